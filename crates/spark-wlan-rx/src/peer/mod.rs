//! 对端表与引用计数生命周期。

mod object;
mod state;
mod table;

pub use object::{ModuleId, Peer, PeerRef, PeerRxStats, PeerSpec};
pub use state::{PeerKind, PeerState};
pub use table::PeerTable;
