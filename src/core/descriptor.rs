//! The descriptor document served next to a handler library.
use std::{
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use crate::core::error::DescriptorError;

/// Extension the descriptor document carries in place of the library's.
pub const DESCRIPTOR_EXTENSION: &str = "wsdl";
/// Query string that asks for the descriptor.
pub const DESCRIPTOR_QUERY: &str = "wsdl";
pub const DESCRIPTOR_CONTENT_TYPE: &str = "text/xml";
/// Largest descriptor that will be served.
pub const DESCRIPTOR_MAX_BYTES: u64 = 16 * 1024 * 1024;

/// Where the descriptor for a primary library lives.
///
/// `/srv/lib.so` maps to `/srv/lib.wsdl`; versioned names such as
/// `libcalc.so.1.2` drop everything from `.so` on.
pub fn descriptor_path(primary_library: &str) -> PathBuf {
    let path = Path::new(primary_library);
    if let Some(name) = path.file_name().and_then(|n| n.to_str())
        && let Some(stem_end) = name.find(".so")
    {
        return path.with_file_name(format!("{}.{}", &name[..stem_end], DESCRIPTOR_EXTENSION));
    }
    path.with_extension(DESCRIPTOR_EXTENSION)
}

/// Read a descriptor, refusing anything over [`DESCRIPTOR_MAX_BYTES`].
pub fn read_descriptor(path: &Path) -> Result<Vec<u8>, DescriptorError> {
    let display = path.display().to_string();
    let io_error = |source: io::Error| {
        if source.kind() == io::ErrorKind::NotFound {
            DescriptorError::NotFound {
                path: display.clone(),
            }
        } else {
            DescriptorError::Io {
                path: display.clone(),
                source,
            }
        }
    };

    let file = File::open(path).map_err(io_error)?;
    let size = file.metadata().map_err(io_error)?.len();
    if size > DESCRIPTOR_MAX_BYTES {
        return Err(DescriptorError::TooLarge {
            path: path.display().to_string(),
            size,
            limit: DESCRIPTOR_MAX_BYTES,
        });
    }

    // The file may grow between stat and read
    let mut contents = Vec::with_capacity(size as usize);
    file.take(DESCRIPTOR_MAX_BYTES + 1)
        .read_to_end(&mut contents)
        .map_err(io_error)?;
    if contents.len() as u64 > DESCRIPTOR_MAX_BYTES {
        return Err(DescriptorError::TooLarge {
            path: path.display().to_string(),
            size: contents.len() as u64,
            limit: DESCRIPTOR_MAX_BYTES,
        });
    }
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_descriptor_path() {
        assert_eq!(descriptor_path("/srv/lib.so"), PathBuf::from("/srv/lib.wsdl"));
        assert_eq!(
            descriptor_path("/srv/libcalc.so.1.2"),
            PathBuf::from("/srv/libcalc.wsdl")
        );
        assert_eq!(descriptor_path("/srv/calc.dylib"), PathBuf::from("/srv/calc.wsdl"));
        assert_eq!(descriptor_path("calc"), PathBuf::from("calc.wsdl"));
    }

    #[test]
    fn test_read_descriptor() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<definitions/>").unwrap();
        assert_eq!(read_descriptor(file.path()).unwrap(), b"<definitions/>");
    }

    #[test]
    fn test_missing_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_descriptor(&dir.path().join("absent.wsdl")).unwrap_err();
        assert!(matches!(err, DescriptorError::NotFound { .. }));
    }

    #[test]
    fn test_oversized_descriptor() {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(17 * 1024 * 1024).unwrap();
        let err = read_descriptor(file.path()).unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::TooLarge { size, .. } if size == 17 * 1024 * 1024
        ));
    }
}
