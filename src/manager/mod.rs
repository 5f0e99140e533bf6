/*!
 * Key Manager Lifecycle
 *
 * Ties a key source to a secret store: the [`KeyManager`] issues tokens and
 * transfer encryption keys while a background refresher keeps block keys
 * current until the manager is closed.
 */

mod key_manager;
pub(crate) mod refresher;
pub(crate) mod run_state;

#[cfg(test)]
mod tests;

pub use key_manager::KeyManager;
pub use refresher::RefreshHealthSnapshot;
pub use run_state::RunState;
