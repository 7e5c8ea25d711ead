use std::fmt;
use std::path::{Component, Path};

/// Longest file name (in bytes) we will create.
const MAX_FILENAME_BYTES: usize = 200;
const MAX_EXTENSION_BYTES: usize = 16;

// Reserved on Windows, awkward everywhere else.
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*', '/', '\\'];

//===============
// Path Handling
//===============
#[derive(Debug, PartialEq, Eq)]
pub enum PathValidationError {
    ContainsParentDir,
    AbsolutePath,
    InvalidComponent,
    NullByte,
    Empty,
    NotAFileName,
}

impl fmt::Display for PathValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathValidationError::ContainsParentDir => {
                write!(f, "Path contains parent directory (..)")
            }
            PathValidationError::AbsolutePath => write!(f, "Path is absolute"),
            PathValidationError::InvalidComponent => write!(f, "Path contains invalid component"),
            PathValidationError::NullByte => write!(f, "Path contains null byte"),
            PathValidationError::Empty => write!(f, "Path is empty"),
            PathValidationError::NotAFileName => write!(f, "Path has more than one component"),
        }
    }
}

impl std::error::Error for PathValidationError {}

// Checks for: empty strings, null bytes, parent directory traversal, absolute paths
fn validate_path_components(path_str: &str) -> Result<(), PathValidationError> {
    if path_str.is_empty() {
        return Err(PathValidationError::Empty);
    }

    // rust uses C-style APIs so \0 can end str early
    if path_str.contains('\0') {
        return Err(PathValidationError::NullByte);
    }

    for component in Path::new(path_str).components() {
        match component {
            Component::Normal(_) => continue,
            Component::ParentDir => return Err(PathValidationError::ContainsParentDir),
            Component::RootDir => return Err(PathValidationError::AbsolutePath),
            Component::CurDir => return Err(PathValidationError::InvalidComponent),
            Component::Prefix(_) => return Err(PathValidationError::InvalidComponent), // Windows
        }
    }

    Ok(())
}

/// Accepts only a single plain file name that stays inside the upload directory.
pub fn validate_filename(filename: &str) -> Result<(), PathValidationError> {
    validate_path_components(filename)?;

    if Path::new(filename).components().count() != 1 {
        return Err(PathValidationError::NotAFileName);
    }

    Ok(())
}

/// Turn a browser-supplied name into a safe single file name.
///
/// Directory parts are dropped (some browsers send full paths), control and
/// reserved characters are removed, and over-long names are shortened while
/// keeping the extension. Returns `None` when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !FORBIDDEN_CHARS.contains(c))
        .collect();

    // Trailing dots and spaces are stripped by Windows and confuse Finder.
    let trimmed = cleaned.trim().trim_end_matches(['.', ' ']).to_string();

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        return None;
    }

    let name = truncate_filename(&trimmed);
    validate_filename(&name).ok()?;
    Some(name)
}

fn truncate_filename(name: &str) -> String {
    if name.len() <= MAX_FILENAME_BYTES {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 && name.len() - pos <= MAX_EXTENSION_BYTES => name.split_at(pos),
        _ => (name, ""),
    };

    let budget = MAX_FILENAME_BYTES - ext.len();
    let mut cut = budget.min(stem.len());
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{}", &stem[..cut], ext)
}
