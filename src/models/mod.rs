mod plan;
mod recording;
mod requests;
mod responses;

pub use plan::*;
pub use recording::*;
pub use requests::*;
pub use responses::*;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}
