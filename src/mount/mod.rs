//! Kernel mount adapter
//!
//! The thin FUSE-facing layer: an inode↔path table and a `fuser::Filesystem`
//! implementation that forwards everything to the dispatcher.

mod filesystem;
mod inode;

pub use filesystem::VeilFs;
pub use inode::{InodeManager, ROOT_INO};

use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::MountConfig;
use crate::error::{Error, Result};
use crate::vfs::Dispatcher;

/// Mount the dispatcher at `mount_point` and serve until unmounted.
pub fn mount(dispatcher: Arc<Dispatcher>, mount_point: &Path, config: &MountConfig) -> Result<()> {
    let mut options = vec![
        fuser::MountOption::FSName(config.fs_name.clone()),
        fuser::MountOption::AutoUnmount,
    ];
    if config.allow_other {
        options.push(fuser::MountOption::AllowOther);
    }
    if config.allow_root {
        options.push(fuser::MountOption::AllowRoot);
    }

    info!("Mounting at {:?}", mount_point);
    fuser::mount2(VeilFs::new(dispatcher), mount_point, &options).map_err(Error::Io)
}
