// Core modules implementing the setting model, wire codec, buffers, and error modeling.
pub mod buffer;
pub mod decode;
pub mod encode;
pub mod error;
pub mod field;
pub mod setting;
