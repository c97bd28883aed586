//! Uploaded figures and appendix files.
//!
//! Files are copied into the draft's upload store as `{key}__{name}` so two
//! fields can hold files with the same name. Characters of the key that are
//! unsafe in a file name are percent-encoded.

use base64::Engine;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CardError, Result};
use crate::form::Scope;
use crate::schema::{FieldType, ModelCardSchema};
use crate::state::{AppendixFile, FormState, UploadRecord};

/// Extensions accepted for uploads.
pub const ALLOWED_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "bmp", "tiff", "svg", "pdf"];

const APPENDIX_PREFIX: &str = "appendix";

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

pub fn is_allowed(path: &Path) -> bool {
    extension(path).is_some_and(|e| ALLOWED_EXTENSIONS.contains(&e.as_str()))
}

/// MIME type guessed from the file extension.
pub fn guess_mime(path: &Path) -> Option<&'static str> {
    let mime = match extension(path)?.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "zip" => "application/zip",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => return None,
    };
    Some(mime)
}

pub fn is_image(path: &Path) -> bool {
    guess_mime(path).is_some_and(|m| m.starts_with("image/"))
}

/// Encode bytes as a base64 `data:` URI.
pub fn to_data_uri(mime: Option<&str>, data: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(data);
    format!("data:{};base64,{b64}", mime.unwrap_or("application/octet-stream"))
}

/// Data URI of an image file; `None` for non-images and unreadable files.
pub fn file_to_data_uri(path: &Path) -> Option<String> {
    let mime = guess_mime(path).filter(|m| m.starts_with("image/"))?;
    match std::fs::read(path) {
        Ok(data) => Some(to_data_uri(Some(mime), &data)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read image");
            None
        }
    }
}

fn file_name(source: &Path) -> Result<String> {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| CardError::invalid_value(format!("'{}' has no file name", source.display())))
}

fn check_source(source: &Path) -> Result<()> {
    if !source.is_file() {
        return Err(CardError::NotFound(source.to_path_buf()));
    }
    if !is_allowed(source) {
        return Err(CardError::invalid_value(format!(
            "'{}' is not an accepted file type ({})",
            source.display(),
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    Ok(())
}

/// `key` with every byte outside `[A-Za-z0-9._-]` written as `%XX`.
fn stored_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Copy through a temporary file so a failed copy leaves `target` as it was.
fn copy_into(source: &Path, store_dir: &Path, stored_name: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(store_dir)?;
    let target = store_dir.join(stored_name);
    let tmp = store_dir.join(format!("{stored_name}.tmp"));
    if let Err(e) = std::fs::copy(source, &tmp).and_then(|_| std::fs::rename(&tmp, &target)) {
        remove_stored(&tmp);
        return Err(e.into());
    }
    Ok(target)
}

pub(crate) fn remove_stored(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Could not delete stored file"),
    }
}

/// Copy `source` into `store_dir` as the file of `full_key`, replacing any
/// previous upload for that key. The field value records the file name.
///
/// The previous upload is only dropped once the new copy is in place.
pub fn attach(
    state: &mut FormState,
    full_key: &str,
    source: &Path,
    store_dir: &Path,
) -> Result<UploadRecord> {
    check_source(source)?;
    let name = file_name(source)?;
    let path = copy_into(source, store_dir, &format!("{}__{name}", stored_key(full_key)))?;
    if let Some(previous) = state.remove_upload(full_key) {
        if previous.path != path {
            remove_stored(&previous.path);
        }
    }
    let record = UploadRecord { name: name.clone(), path };
    state.set_upload(full_key, record.clone());
    state.set(full_key, name);
    debug!(key = full_key, path = %record.path.display(), "Attached file");
    Ok(record)
}

/// Attach a file to an image field of the schema.
pub fn attach_field(
    state: &mut FormState,
    schema: &ModelCardSchema,
    section: &str,
    field: &str,
    scope: &Scope,
    source: &Path,
    store_dir: &Path,
) -> Result<UploadRecord> {
    let props = schema.require_field(section, field)?;
    if props.field_type != FieldType::Image {
        return Err(CardError::invalid_value(format!("'{field}' does not take a file")));
    }
    scope.validate(state, section, field)?;
    attach(state, &scope.key(section, field), source, store_dir)
}

/// Remove the upload of `full_key` and its stored file.
pub fn detach(state: &mut FormState, full_key: &str) -> Result<UploadRecord> {
    let record = state
        .remove_upload(full_key)
        .ok_or_else(|| CardError::invalid_value(format!("no file attached to '{full_key}'")))?;
    remove_stored(&record.path);
    state.remove(full_key);
    Ok(record)
}

/// Add a file to the appendix. A file with the same name is replaced.
pub fn add_appendix(
    state: &mut FormState,
    source: &Path,
    label: &str,
    store_dir: &Path,
) -> Result<AppendixFile> {
    check_source(source)?;
    let name = file_name(source)?;
    let stored_path = copy_into(source, store_dir, &format!("{APPENDIX_PREFIX}__{name}"))?;
    if let Some(index) = state.appendix().iter().position(|a| a.original_name == name) {
        let previous = state.appendix_mut().remove(index);
        debug!(name = %previous.original_name, "Replacing appendix file");
        if previous.stored_path != stored_path {
            remove_stored(&previous.stored_path);
        }
    }
    let file = AppendixFile {
        original_name: name,
        stored_path,
        label: label.trim().to_string(),
    };
    state.appendix_mut().push(file.clone());
    Ok(file)
}

/// Remove an appendix file by its original name.
pub fn remove_appendix(state: &mut FormState, original_name: &str) -> Result<AppendixFile> {
    let index = state
        .appendix()
        .iter()
        .position(|a| a.original_name == original_name)
        .ok_or_else(|| {
            CardError::invalid_value(format!("'{original_name}' is not in the appendix"))
        })?;
    let file = state.appendix_mut().remove(index);
    remove_stored(&file.stored_path);
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_guess_mime() {
        assert_eq!(guess_mime(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(guess_mime(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(guess_mime(Path::new("a.pdf")), Some("application/pdf"));
        assert_eq!(guess_mime(Path::new("a")), None);
        assert!(is_image(Path::new("x.svg")));
        assert!(!is_image(Path::new("x.pdf")));
    }

    #[test]
    fn test_data_uri() {
        assert_eq!(to_data_uri(Some("image/png"), b"hi"), "data:image/png;base64,aGk=");
        assert_eq!(to_data_uri(None, b""), "data:application/octet-stream;base64,");
    }

    #[test]
    fn test_file_to_data_uri_only_for_images() {
        let dir = tempfile::tempdir().unwrap();
        let png = dir.path().join("f.png");
        let pdf = dir.path().join("f.pdf");
        fs::write(&png, b"hi").unwrap();
        fs::write(&pdf, b"hi").unwrap();
        assert_eq!(file_to_data_uri(&png).as_deref(), Some("data:image/png;base64,aGk="));
        assert_eq!(file_to_data_uri(&pdf), None);
        assert_eq!(file_to_data_uri(&dir.path().join("gone.png")), None);
    }

    #[test]
    fn test_attach_replaces_previous_upload() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let a = src.path().join("a.png");
        let b = src.path().join("b.png");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let mut state = FormState::new();
        let key = "technical_specifications_model_pipeline_figure";
        let first = attach(&mut state, key, &a, store.path()).unwrap();
        assert!(first.path.ends_with(format!("{key}__a.png")));
        let second = attach(&mut state, key, &b, store.path()).unwrap();
        assert!(!first.path.exists());
        assert!(second.path.exists());
        assert_eq!(state.get_str(key), Some("b.png"));
        assert!(state.has_image(key));

        detach(&mut state, key).unwrap();
        assert!(!second.path.exists());
        assert!(state.get(key).is_none());
        assert!(detach(&mut state, key).is_err());
    }

    #[test]
    fn test_stored_key_escapes_path_separators() {
        assert_eq!(stored_key("evaluation_Ext.DSC_figure"), "evaluation_Ext.DSC_figure");
        assert_eq!(stored_key("evaluation_Site A/B_x"), "evaluation_Site%20A%2FB_x");
        assert_eq!(stored_key("a\\b%"), "a%5Cb%25");
        assert_ne!(stored_key("a/b"), stored_key("a%2Fb"));
    }

    #[test]
    fn test_failed_reattach_keeps_previous_upload() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let a = src.path().join("a.png");
        let b = src.path().join("b.png");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let mut state = FormState::new();
        let key = "learning_architecture_0_architecture_figure";
        let first = attach(&mut state, key, &a, store.path()).unwrap();

        let blocked = src.path().join("not-a-dir");
        fs::write(&blocked, b"").unwrap();
        assert!(attach(&mut state, key, &b, &blocked).is_err());
        assert!(first.path.exists());
        assert_eq!(state.uploads().get(key), Some(&first));
        assert_eq!(state.get_str(key), Some("a.png"));
    }

    #[test]
    fn test_reattach_same_file_keeps_it() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let a = src.path().join("a.png");
        fs::write(&a, b"a").unwrap();
        let mut state = FormState::new();
        let key = "technical_specifications_model_pipeline_figure";
        attach(&mut state, key, &a, store.path()).unwrap();
        let again = attach(&mut state, key, &a, store.path()).unwrap();
        assert_eq!(fs::read(&again.path).unwrap(), b"a");
        assert!(state.has_image(key));
    }

    #[test]
    fn test_attach_rejects_bad_files() {
        let src = tempfile::tempdir().unwrap();
        let txt = src.path().join("notes.txt");
        fs::write(&txt, b"x").unwrap();
        let mut state = FormState::new();
        assert!(matches!(
            attach(&mut state, "k", &txt, src.path()),
            Err(CardError::InvalidValue(_))
        ));
        assert!(matches!(
            attach(&mut state, "k", &src.path().join("none.png"), src.path()),
            Err(CardError::NotFound(_))
        ));
    }

    #[test]
    fn test_attach_field_checks_type() {
        let schema = ModelCardSchema::embedded().unwrap();
        let src = tempfile::tempdir().unwrap();
        let png = src.path().join("fig.png");
        fs::write(&png, b"x").unwrap();
        let mut state = FormState::new();
        assert!(
            attach_field(&mut state, &schema, "model_basic_information", "name", &Scope::Card, &png, src.path())
                .is_err()
        );
        attach_field(
            &mut state,
            &schema,
            "technical_specifications",
            "model_pipeline_figure",
            &Scope::Card,
            &png,
            &src.path().join("store"),
        )
        .unwrap();
        assert!(state.has_image("technical_specifications_model_pipeline_figure"));
    }

    #[test]
    fn test_appendix() {
        let src = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        let pdf = src.path().join("protocol.pdf");
        fs::write(&pdf, b"%PDF").unwrap();
        let mut state = FormState::new();
        add_appendix(&mut state, &pdf, " Study protocol ", store.path()).unwrap();
        add_appendix(&mut state, &pdf, "Protocol v2", store.path()).unwrap();
        assert_eq!(state.appendix().len(), 1);
        assert_eq!(state.appendix()[0].label, "Protocol v2");
        let removed = remove_appendix(&mut state, "protocol.pdf").unwrap();
        assert!(!removed.stored_path.exists());
        assert!(remove_appendix(&mut state, "protocol.pdf").is_err());
    }
}
