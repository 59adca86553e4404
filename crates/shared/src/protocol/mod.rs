pub mod handshake;
pub mod input;
pub mod types;
pub mod video;

pub use handshake::*;
pub use input::*;
pub use types::*;
pub use video::*;
