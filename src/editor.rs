//! Editor session support: document version keys and the signed descriptor
//! handed to the browser-side editor.

mod key;
mod descriptor;

pub use key::{compute_key, KEY_LEN};
pub use descriptor::{
    callback_url, download_url, normalize_language, DescriptorBuilder, DescriptorError, DescriptorRequest, DocumentConfig, EditMode, EditorClaims,
    EditorConfig, Permissions, SessionDescriptor, UserInfo, ANONYMOUS_USER_ID, ANONYMOUS_USER_NAME, DEFAULT_BASE_URL,
};
