//! Configuration for stemdesk
//!
//! - Generic YAML config loading/saving
//! - The desk's stem list and engine tuning
//! - Standard config locations
//!
//! ```ignore
//! use stemdesk_core::config::{default_config_path, load_config, DeskConfig};
//!
//! let config: DeskConfig = load_config(&default_config_path());
//! ```

mod desk;
mod io;
mod paths;

pub use desk::{DeskConfig, StemEntry};
pub use io::{load_config, read_config, save_config};
pub use paths::{config_dir, default_config_path};
