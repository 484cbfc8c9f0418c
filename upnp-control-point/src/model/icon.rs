use std::sync::{Arc, OnceLock};

/// Chooses which icons of a device to download.
///
/// The default selects none.
pub type IconFilter = Arc<dyn Fn(&[Arc<Icon>]) -> Vec<Arc<Icon>> + Send + Sync>;

/// An entry of a device's icon list
#[derive(Debug)]
pub struct Icon {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// URL as written in the description, relative to the device base URL
    pub url: String,
    data: OnceLock<Vec<u8>>,
}

impl Icon {
    pub(crate) fn new(mime_type: String, width: u32, height: u32, depth: u32, url: String) -> Self {
        Self {
            mime_type,
            width,
            height,
            depth,
            url,
            data: OnceLock::new(),
        }
    }

    /// Image bytes, present only if the icon filter selected this icon and
    /// the download succeeded
    pub fn binary(&self) -> Option<&[u8]> {
        self.data.get().map(Vec::as_slice)
    }

    pub(crate) fn set_binary(&self, data: Vec<u8>) {
        let _ = self.data.set(data);
    }
}

pub(crate) fn no_icons() -> IconFilter {
    Arc::new(|_: &[Arc<Icon>]| Vec::new())
}
