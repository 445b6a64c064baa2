//! Value types shared by stores, folders and the diary.

mod flags;
mod folder;
mod message;
mod uid;

pub use flags::{Flag, Flags};
pub use folder::{FolderCapabilities, FolderInfo, FolderInfoFlags, GetFolderFlags};
pub use message::{Envelope, Message};
pub use uid::{Uid, UidMapping};
