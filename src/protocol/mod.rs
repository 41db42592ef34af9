pub mod packet;

pub use packet::{Frame, MaplePacket};
