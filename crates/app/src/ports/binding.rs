//! Binding port: the contract every device family implements.
//!
//! A binding attaches items to a class of devices (DMX universe, Modbus
//! line, …). Items are routed to it by the first key of their binding line.

use uhab_domain::binding_config::BindingConfig;
use uhab_domain::error::HubError;
use uhab_domain::state::ItemState;

use crate::bus::Bus;
use crate::repository::Item;

/// A pluggable device family.
///
/// The daemon drives the lifecycle in order:
///
/// 1. [`init`](Self::init): allocate resources; a failure excludes the
///    binding from the active set
/// 2. [`configure`](Self::configure): once per item routed to the binding
/// 3. [`start`](Self::start): open devices and spawn workers
/// 4. (the bus runs, forwarding item commands via [`send_command`](Self::send_command))
/// 5. [`deinit`](Self::deinit): stop workers and release devices
///
/// Implementations must be cheap to call from the bus worker: `send_command`
/// should enqueue work and return, never block on a device.
pub trait Binding: Send + Sync {
    /// Unique short name, matched against the first key of a binding line.
    fn name(&self) -> &'static str;

    /// Human-readable name for logs.
    fn label(&self) -> &'static str;

    fn init(&self) -> Result<(), HubError>;

    fn deinit(&self) -> Result<(), HubError>;

    /// Start the binding's workers. Items reached through `bus` are final.
    fn start(&self, bus: &Bus) -> Result<(), HubError>;

    /// Attach `item` using its parsed binding line.
    ///
    /// # Errors
    ///
    /// A configuration error leaves the item unbound; the repository logs it
    /// and carries on.
    fn configure(&self, item: &Item, config: &BindingConfig) -> Result<(), HubError>;

    /// Forward a command for a bound item.
    ///
    /// TOGGLE arrives resolved to ON/OFF when the item holds a command
    /// state; items holding a number (dimmers) receive it as is. The binding
    /// reports the confirmed result later through [`Bus::update`].
    fn send_command(&self, bus: &Bus, item: &Item, state: &ItemState) -> Result<(), HubError>;
}
