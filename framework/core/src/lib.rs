mod cooldown;
mod pool;
mod shutdown;

pub mod prelude {
    pub use crate::cooldown::CooldownGate;
    pub use crate::pool::{PoolClosedError, WorkerPool};
    pub use crate::shutdown::{ShutdownHandle, ShutdownListener};
}
