//! 接收描述符：Cookie 编解码、自由链表与描述符池。

mod cookie;
mod free_list;
mod pool;

pub use cookie::{CookieCodec, CookieLayout, DescLocator};
pub use free_list::{DescHandle, DescList};
pub use pool::{DescLocation, DescriptorInfo, DescriptorPool, Reaped};
