use std::fs;
use std::path::Path;

use image::RgbImage;
use plotters::{
    coord::Shift,
    prelude::*,
};

use crate::dataset::DatasetKind;
use crate::error::{Error, Result};

/// Marker colors of the classes, in class order.
pub const CLASS_COLORS: [RGBColor; 10] = [
    RGBColor(0xff, 0x00, 0x00),
    RGBColor(0xff, 0xff, 0x00),
    RGBColor(0x00, 0xff, 0x00),
    RGBColor(0x00, 0xff, 0xff),
    RGBColor(0x00, 0x00, 0xff),
    RGBColor(0xff, 0x00, 0xff),
    RGBColor(0x99, 0x00, 0x00),
    RGBColor(0x99, 0x99, 0x00),
    RGBColor(0x00, 0x99, 0x00),
    RGBColor(0x00, 0x99, 0x99),
];

/// Embeddings collected over an epoch with the label of each sample.
#[derive(Debug, Clone, Default)]
pub struct Embeddings {
    dim: usize,
    values: Vec<f32>,
    labels: Vec<usize>,
}

impl Embeddings {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Default::default()
        }
    }

    /// Appends a batch of row-major embeddings.
    pub fn extend(&mut self, values: &[f32], labels: &[usize]) {
        assert_eq!(
            values.len(),
            labels.len() * self.dim,
            "Expected {} values per label",
            self.dim
        );

        self.values.extend_from_slice(values);
        self.labels.extend_from_slice(labels);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// The first two coordinates of every embedding.
    pub fn points(&self) -> impl Iterator<Item = [f32; 2]> + '_ {
        self.values.chunks(self.dim).map(|row| {
            let x = row.first().copied().unwrap_or_default();
            let y = row.get(1).copied().unwrap_or_default();
            [x, y]
        })
    }
}

/// Scatter plot of 2-D embeddings colored by class.
///
/// The legend and the `epoch=N` caption go through the plotters font backend. Without the `ttf`
/// feature no font is available and only the markers and the axes are drawn.
#[derive(Debug, Clone)]
pub struct ScatterPlot {
    pub width: u32,
    pub height: u32,
    /// Visible range of the first coordinate.
    pub x_range: (f32, f32),
    /// Visible range of the second coordinate.
    pub y_range: (f32, f32),
    pub marker_radius: u32,
    /// Legend entry of each class.
    pub class_names: Vec<String>,
}

impl Default for ScatterPlot {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            x_range: (-8.0, 8.0),
            y_range: (-8.0, 8.0),
            marker_radius: 2,
            class_names: (0..CLASS_COLORS.len()).map(|class| class.to_string()).collect(),
        }
    }
}

impl ScatterPlot {
    /// Default plot with the class names of `dataset` in the legend.
    pub fn for_dataset(dataset: DatasetKind) -> Self {
        Self {
            class_names: dataset
                .class_names()
                .iter()
                .map(|name| name.to_string())
                .collect(),
            ..Default::default()
        }
    }

    /// Renders the embeddings; points outside of the visible ranges are clipped.
    pub fn render(&self, embeddings: &Embeddings, epoch: usize) -> Result<RgbImage> {
        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        {
            let root =
                BitMapBackend::with_buffer(&mut buffer, (self.width, self.height)).into_drawing_area();
            self.draw(&root, embeddings, epoch)
                .map_err(|err| Error::Plot(err.to_string()))?;
            root.present()
                .map_err(|err| Error::Plot(err.to_string()))?;
        }

        RgbImage::from_raw(self.width, self.height, buffer)
            .ok_or_else(|| Error::Plot("rendered buffer does not match the plot size".into()))
    }

    /// Renders the embeddings and writes them as a PNG file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, embeddings: &Embeddings, epoch: usize, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }

        self.render(embeddings, epoch)?.save(path)?;
        log::info!("Saved embedding plot to '{}'", path.display());

        Ok(())
    }

    fn contains(&self, [x, y]: [f32; 2]) -> bool {
        (self.x_range.0..=self.x_range.1).contains(&x) && (self.y_range.0..=self.y_range.1).contains(&y)
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
        embeddings: &Embeddings,
        epoch: usize,
    ) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(root)
            .margin(10)
            .x_label_area_size(30)
            .y_label_area_size(30)
            .build_cartesian_2d(
                self.x_range.0..self.x_range.1,
                self.y_range.0..self.y_range.1,
            )?;
        chart.configure_mesh().disable_mesh().draw()?;

        // Axes through the origin.
        let axis = BLACK.mix(0.2);
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(self.x_range.0, 0.0), (self.x_range.1, 0.0)],
            &axis,
        )))?;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(0.0, self.y_range.0), (0.0, self.y_range.1)],
            &axis,
        )))?;

        let radius = self.marker_radius;
        for (class, color) in CLASS_COLORS.iter().copied().enumerate() {
            let points = embeddings
                .points()
                .zip(embeddings.labels())
                .filter(|(point, label)| **label == class && self.contains(*point))
                .map(|([x, y], _)| Circle::new((x, y), radius, color.filled()));
            let name = self
                .class_names
                .get(class)
                .cloned()
                .unwrap_or_else(|| class.to_string());

            chart
                .draw_series(points)?
                .label(name)
                .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
        }

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.draw(&Text::new(
            format!("epoch={epoch}"),
            (50, 15),
            ("sans-serif", 20).into_font(),
        ))?;

        Ok(())
    }
}
