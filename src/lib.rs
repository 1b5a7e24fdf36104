/*!
Drivers for telescopes, domes and focusers speaking the [ASCOM Alpaca](https://ascom-standards.org/Developer/Alpaca.htm) protocol.

Each driver wraps one remote device: it polls the server's liveness in the
background, refuses requests while the server is unreachable, and runs
motion commands one at a time per motion kind with cooperative abort.

```no_run
# async fn example() -> eyre::Result<()> {
use ascom_alpaca_drivers::api::{Focuser as _, Motion as _};
use ascom_alpaca_drivers::{DeviceConfig, EventBus, Focuser, FocuserOptions};

let config = DeviceConfig::new("observatory.local", 11111, "focuser", 0);
let focuser = Focuser::new(&config, FocuserOptions::default(), EventBus::default())?;
focuser.open().await;

focuser.set_focus(12.5).await?;
println!("focus is now {}", focuser.get_focus().await?);
focuser.stop_motion().await?;

focuser.close().await;
# Ok(())
# }
```
*/

#![warn(
    clippy::pedantic,
    clippy::nursery,
    clippy::as_conversions,
    clippy::clone_on_ref_ptr,
    clippy::default_numeric_fallback,
    clippy::format_push_string,
    clippy::if_then_some_else_none,
    clippy::map_err_ignore,
    clippy::panic_in_result_fn,
    clippy::single_char_lifetime_names,
    clippy::str_to_string,
    clippy::unwrap_used,
    elided_lifetimes_in_paths,
    explicit_outlives_requirements,
    meta_variable_misuse,
    missing_copy_implementations,
    missing_debug_implementations,
    noop_method_call,
    single_use_lifetimes,
    unreachable_pub,
    unused_lifetimes,
    unused_macro_rules,
    unused_qualifications,
    unused_results
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::return_self_not_must_use,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::redundant_pub_crate,
    clippy::single_match_else
)]

pub(crate) mod macros;

pub mod api;
pub mod azimuth;
mod client;
mod config;
pub mod devices;
mod errors;
pub mod events;
pub mod monitor;
pub mod motion;
mod params;

#[cfg(test)]
mod test_utils;

pub use client::AlpacaClient;
pub use config::{DeviceConfig, Endpoint, SUPPORTED_VERSION};
pub use devices::AlpacaDevice;
#[cfg(feature = "dome")]
pub use devices::{Dome, DomeOptions, ShutterState};
#[cfg(feature = "focuser")]
pub use devices::{Focuser, FocuserOptions};
#[cfg(feature = "telescope")]
pub use devices::{Telescope, TelescopeOptions};
pub use errors::{ASCOMError, ASCOMErrorCode, Error, Result, TransportError};
pub use events::{DriverEvent, EventBus};
pub use motion::{MotionStatus, Outcome};
pub use params::ASCOMValue;
