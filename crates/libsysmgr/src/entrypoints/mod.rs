//! Subcommand entry points of the multi-call binary.

mod convert_fstab;
mod convert_units;
mod fifo_listen;
mod initctl_read;
mod manager;
mod service_is_ok;
mod system_control;

pub use convert_fstab::{run_convert_fstab_services, run_write_volume_service_bundles};
pub use convert_units::run_convert_systemd_units;
pub use fifo_listen::run_fifo_listen;
pub use initctl_read::run_initctl_read;
pub use manager::{run_per_user_manager, run_system_manager};
pub use service_is_ok::run_service_is_ok;
pub use system_control::run_system_control;
