mod build;
mod check;
mod common;
mod dev;
mod mode;
mod shim;

pub use build::execute_build_pipeline;
pub use check::execute_check_pipeline;
pub use dev::execute_dev_pipeline;
pub use mode::execute_mode_pipeline;
pub use shim::execute_shim_pipeline;
