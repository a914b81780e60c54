pub mod cache;
pub mod fs_utils;
pub mod rollout;

pub use cache::{CacheStrategy, FileCache};
pub use fs_utils::{
    check_path_safety, is_within_root, normalize_path, resolve_within_root, PathSafetyError,
};
pub use rollout::in_rollout;
