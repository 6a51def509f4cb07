use std::process::ExitCode;

use burn::backend::Autodiff;
use center_loss::{
    cli::{Cli, Commands},
    logging::install_logger,
    training::{evaluate, train},
    visualize::ScatterPlot,
    Result,
};
use clap::Parser;

#[cfg(feature = "wgpu")]
mod backend {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    pub type Selected = Wgpu;

    pub fn device() -> WgpuDevice {
        WgpuDevice::default()
    }
}

#[cfg(all(feature = "tch-gpu", not(feature = "wgpu")))]
mod backend {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub type Selected = LibTorch;

    pub fn device() -> LibTorchDevice {
        #[cfg(not(target_os = "macos"))]
        let device = LibTorchDevice::Cuda(0);
        #[cfg(target_os = "macos")]
        let device = LibTorchDevice::Mps;

        device
    }
}

#[cfg(all(feature = "tch-cpu", not(any(feature = "wgpu", feature = "tch-gpu"))))]
mod backend {
    use burn::backend::libtorch::{LibTorch, LibTorchDevice};

    pub type Selected = LibTorch;

    pub fn device() -> LibTorchDevice {
        LibTorchDevice::Cpu
    }
}

#[cfg(not(any(feature = "wgpu", feature = "tch-gpu", feature = "tch-cpu")))]
mod backend {
    use burn::backend::ndarray::{NdArray, NdArrayDevice};

    pub type Selected = NdArray;

    pub fn device() -> NdArrayDevice {
        NdArrayDevice::Cpu
    }
}

fn run(cli: Cli) -> Result<()> {
    let device = backend::device();

    match cli.command {
        Commands::Train(args) => {
            let config = args.training_config()?;
            train::<Autodiff<backend::Selected>>(
                &config,
                &args.dataset_dir,
                &args.artifacts(),
                &ScatterPlot::for_dataset(config.dataset),
                device,
            )?;
        }
        Commands::Test(args) => {
            evaluate::<backend::Selected>(
                args.dataset,
                &args.dataset_dir,
                &args.model_path,
                &args.options(),
                device,
            )?;
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = install_logger(cli.log_file.as_deref(), cli.verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                log::error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
