use std::io;
use std::path::Path;
use std::path::PathBuf;

use path_absolutize::Absolutize;

/// The runtime matches filesystem grants against exact absolute paths, so
/// every path we hand it must be absolutized first.
pub(crate) fn absolutize(path: &Path) -> io::Result<PathBuf> {
    Ok(path.absolutize()?.into_owned())
}
