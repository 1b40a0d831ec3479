//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `config`   | `Config`         |
//! | `projects` | `Projects`       |

pub mod config;
pub mod projects;
pub mod serve;

pub use config::cmd_config;
pub use projects::cmd_projects;
pub use serve::{ServeOverrides, cmd_serve};
