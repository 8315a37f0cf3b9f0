mod paths;

pub use paths::{AppPaths, AppPathsError, PATCH_FILE_NAME};
