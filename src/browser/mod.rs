mod driver;
mod input;
pub mod navigation;
pub mod probes;

pub use driver::{BrowserDriver, FrameInfo, PageDriver};
pub use input::MouseButton;
