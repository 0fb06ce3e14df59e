pub mod catalog;
pub mod constants;
pub mod effects;
pub mod input_buffer;
pub mod room;
pub mod state;
pub mod systems;
pub mod track;
