pub mod bind_descriptor;
pub mod bind_dispatch;

pub use bind_descriptor::{BindDescriptor, BindKind};
pub use bind_dispatch::{
    bind_all, build_descriptor, copy_back, release_from, BindOptions, CopyBack,
};
