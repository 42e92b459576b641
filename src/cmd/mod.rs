//! CLI command implementations.
//!
//! | Module   | Commands handled           |
//! |----------|----------------------------|
//! | `serve`  | `Serve`                    |
//! | `db`     | `Migrate`, `CreateUser`    |
//! | `config` | `Config`                   |

pub mod config;
pub mod db;
pub mod serve;

pub use config::{cmd_config, load_config};
pub use db::{cmd_create_user, cmd_migrate};
pub use serve::cmd_serve;
