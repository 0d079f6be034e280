pub mod pinentry;
pub(crate) mod prompt;

pub use self::pinentry::CliHost;

use std::io;

/// Callbacks the authenticator core requires from its host application.
/// Approval calls may block on user interaction; they run off the async
/// executor.
pub trait HostCallbacks: Send + Sync {
    /// Ask the user to approve creating a credential for `rp_id`.
    fn approve_account_creation(&self, rp_id: &str) -> bool;

    /// Ask the user to approve signing in to `rp_id`.
    fn approve_account_login(&self, rp_id: &str) -> bool;

    /// Fetch the sealed device state. `None` means no state exists yet.
    fn load_state(&self) -> io::Result<Option<Vec<u8>>>;

    /// Store the sealed device state.
    fn save_state(&self, data: &[u8]) -> io::Result<()>;

    /// The passphrase protecting the device state.
    fn passphrase(&self) -> io::Result<String>;
}
