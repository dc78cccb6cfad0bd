//! Serial data path
//!
//! Pools of transfer requests for each direction, the status channel, the
//! lifecycle gate and the port that ties them together.

pub mod bridge;
pub mod lifecycle;
pub mod modem;
pub mod port;
pub mod read_pool;
pub mod status;
pub mod wake;
pub mod write_pool;

pub use bridge::{StreamBridge, TransferStats};
pub use lifecycle::{Gate, Lifecycle, Phase, SuspendKind};
pub use modem::{EventCounters, ModemState, StatusUpdate};
pub use port::{SerialPort, SerialSettings};
pub use read_pool::ReadPool;
pub use status::StatusChannel;
pub use wake::WakeWorker;
pub use write_pool::WritePool;
