use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::error::UpdateError;

pub(crate) const EXTRACT_PREFIX: &str = ".extract-";

const ELF_MAGIC: &[u8] = b"\x7fELF";
const PE_MAGIC: &[u8] = b"MZ";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const MACHO_MAGICS: [[u8; 4]; 5] = [
    [0xfe, 0xed, 0xfa, 0xce],
    [0xfe, 0xed, 0xfa, 0xcf],
    [0xce, 0xfa, 0xed, 0xfe],
    [0xcf, 0xfa, 0xed, 0xfe],
    [0xca, 0xfe, 0xba, 0xbe],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Elf,
    Pe,
    MachO,
    Zip,
}

impl PackageFormat {
    /// Executable format of the platform this binary was built for.
    #[must_use]
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            Self::Pe
        } else if cfg!(target_os = "macos") {
            Self::MachO
        } else {
            Self::Elf
        }
    }

    /// Leading bytes that identify the format.
    #[must_use]
    pub fn magic(self) -> &'static [u8] {
        match self {
            Self::Elf => ELF_MAGIC,
            Self::Pe => PE_MAGIC,
            Self::MachO => &MACHO_MAGICS[3],
            Self::Zip => ZIP_MAGIC,
        }
    }

    fn detect(header: &[u8]) -> Option<Self> {
        if header.starts_with(ELF_MAGIC) {
            Some(Self::Elf)
        } else if header.starts_with(ZIP_MAGIC) {
            Some(Self::Zip)
        } else if MACHO_MAGICS.iter().any(|magic| header.starts_with(magic)) {
            Some(Self::MachO)
        } else if header.starts_with(PE_MAGIC) {
            Some(Self::Pe)
        } else {
            None
        }
    }
}

/// What a downloaded artifact must satisfy before it may be installed.
#[derive(Debug, Clone, Copy)]
pub struct VerifyExpectations<'a> {
    pub size: Option<u64>,
    pub sha256: Option<&'a str>,
    pub require_checksum: bool,
    /// File name of the installed executable, used to pick the entry out of
    /// a zip package.
    pub executable_name: &'a str,
    pub staging_dir: &'a Path,
    /// Upper bound for the executable extracted from a zip package.
    pub max_extracted_size: u64,
}

/// An artifact that passed verification, ready to be installed.
#[derive(Debug)]
pub struct VerifiedArtifact {
    executable: PathBuf,
    format: PackageFormat,
    sha256: String,
    _extracted: Option<TempDir>,
}

impl VerifiedArtifact {
    /// Path of the executable to install.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Format of the downloaded package (`Zip` when the executable was
    /// extracted from a package).
    #[must_use]
    pub fn format(&self) -> PackageFormat {
        self.format
    }

    #[must_use]
    pub fn sha256(&self) -> &str {
        &self.sha256
    }
}

/// Check that `artifact` is a complete, well-formed executable package.
///
/// # Errors
/// Returns [`UpdateError::VerificationFailed`] when any check fails, and an
/// I/O error when the artifact cannot be read.
pub fn verify_artifact(
    artifact: &Path,
    expect: &VerifyExpectations<'_>,
) -> Result<VerifiedArtifact, UpdateError> {
    let size = std::fs::metadata(artifact)
        .map_err(|error| UpdateError::io_with_path("failed to inspect download", artifact, &error))?
        .len();
    if size == 0 {
        return Err(UpdateError::verification("downloaded artifact is empty"));
    }
    if let Some(expected) = expect.size
        && expected != size
    {
        return Err(UpdateError::verification(format!(
            "size mismatch: expected {expected} bytes, got {size}"
        )));
    }

    let actual = sha256_file(artifact)?;
    match expect.sha256 {
        Some(expected) if actual.eq_ignore_ascii_case(expected) => {
            info!("Update checksum verified");
        }
        Some(expected) => {
            return Err(UpdateError::verification(format!(
                "checksum mismatch: expected {}, got {actual}",
                expected.to_ascii_lowercase()
            )));
        }
        None if expect.require_checksum => {
            return Err(UpdateError::verification(
                "no checksum published; refusing to apply unverified update",
            ));
        }
        None => warn!("No checksum published for update; skipping digest check"),
    }

    let format = detect_format(artifact)?
        .ok_or_else(|| UpdateError::verification("artifact is not a recognised executable package"))?;

    let (executable, extracted) = if format == PackageFormat::Zip {
        let (dir, path) = extract_executable(
            artifact,
            expect.executable_name,
            expect.staging_dir,
            expect.max_extracted_size,
        )?;
        let inner = detect_format(&path)?;
        ensure_native(inner)?;
        (path, Some(dir))
    } else {
        ensure_native(Some(format))?;
        (artifact.to_path_buf(), None)
    };

    debug!("Verified {:?} artifact {}", format, executable.display());
    Ok(VerifiedArtifact {
        executable,
        format,
        sha256: actual,
        _extracted: extracted,
    })
}

fn ensure_native(format: Option<PackageFormat>) -> Result<(), UpdateError> {
    let native = PackageFormat::native();
    match format {
        Some(found) if found == native => Ok(()),
        Some(found) => Err(UpdateError::verification(format!(
            "package holds a {found:?} executable, this platform runs {native:?}"
        ))),
        None => Err(UpdateError::verification(
            "package entry is not a recognised executable",
        )),
    }
}

fn detect_format(path: &Path) -> Result<Option<PackageFormat>, UpdateError> {
    let mut file = std::fs::File::open(path)
        .map_err(|error| UpdateError::io_with_path("failed to open artifact", path, &error))?;
    let mut header = Vec::with_capacity(4);
    file.by_ref()
        .take(4)
        .read_to_end(&mut header)
        .map_err(|error| UpdateError::io_with_path("failed to read artifact", path, &error))?;
    Ok(PackageFormat::detect(&header))
}

pub(crate) fn sha256_file(path: &Path) -> Result<String, UpdateError> {
    let mut file = std::fs::File::open(path).map_err(|error| {
        UpdateError::io_with_path("failed to open file for checksum", path, &error)
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file.read(&mut buffer).map_err(|error| {
            UpdateError::io_with_path("failed to read file for checksum", path, &error)
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

fn matches_executable(entry_name: &str, executable_name: &str) -> bool {
    fn stem(name: &str) -> &str {
        let len = name.len();
        if len > 4 && name[len - 4..].eq_ignore_ascii_case(".exe") {
            &name[..len - 4]
        } else {
            name
        }
    }
    stem(entry_name).eq_ignore_ascii_case(stem(executable_name))
}

fn extract_executable(
    zip_path: &Path,
    executable_name: &str,
    staging_dir: &Path,
    max_size: u64,
) -> Result<(TempDir, PathBuf), UpdateError> {
    let file = std::fs::File::open(zip_path).map_err(|error| {
        UpdateError::io_with_path("failed to open update package", zip_path, &error)
    })?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| UpdateError::verification(format!("corrupt update package: {error}")))?;

    let mut matching = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|error| UpdateError::verification(format!("corrupt package entry: {error}")))?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        if name
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| matches_executable(n, executable_name))
        {
            matching.push(i);
        }
    }

    let index = match matching.as_slice() {
        [index] => *index,
        [] => {
            return Err(UpdateError::verification(format!(
                "update package does not contain {executable_name}"
            )));
        }
        _ => {
            return Err(UpdateError::verification(format!(
                "update package contains more than one {executable_name}"
            )));
        }
    };

    let dir = tempfile::Builder::new()
        .prefix(EXTRACT_PREFIX)
        .tempdir_in(staging_dir)
        .map_err(|error| UpdateError::io("failed to create extraction directory", error))?;
    let out_path = dir.path().join(executable_name);

    let mut entry = archive
        .by_index(index)
        .map_err(|error| UpdateError::verification(format!("corrupt package entry: {error}")))?;
    if entry.size() > max_size {
        return Err(UpdateError::verification(format!(
            "{executable_name} in update package is {} bytes, limit is {max_size}",
            entry.size()
        )));
    }
    let mut outfile = std::fs::File::create(&out_path).map_err(|error| {
        UpdateError::io_with_path("failed to create extracted file", &out_path, &error)
    })?;
    // Declared sizes can lie; stop one byte past the limit.
    let written = std::io::copy(&mut (&mut entry).take(max_size + 1), &mut outfile)
        .map_err(|error| UpdateError::verification(format!("failed to extract {executable_name}: {error}")))?;
    if written > max_size {
        return Err(UpdateError::verification(format!(
            "{executable_name} in update package exceeds {max_size} bytes"
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = entry.unix_mode().unwrap_or(0o755);
        if let Err(error) =
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode))
        {
            warn!(
                "Failed to set permissions on {}: {error}",
                out_path.display()
            );
        }
    }

    debug!("Extracted {} from update package", out_path.display());
    Ok((dir, out_path))
}
