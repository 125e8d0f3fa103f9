//! 内置处理级实现模块.

pub mod collect;
pub mod gate;
pub mod interp;
pub mod null;
pub mod select;
