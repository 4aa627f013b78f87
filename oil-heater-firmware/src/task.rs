pub mod ble;
pub mod control;
pub mod ui_link;

pub use ble::ble_peripheral;
pub use control::control_loop;
pub use ui_link::ui_link;
