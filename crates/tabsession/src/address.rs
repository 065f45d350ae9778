use url::Url;

/// The browser location as seen by recovery.
///
/// `replace` is a history *replace*: no navigation, no reload and no new
/// history entry.
pub trait AddressBar {
    fn current(&self) -> Url;
    fn replace(&mut self, url: Url);
}

#[derive(Debug, Clone)]
pub struct MemoryAddressBar {
    url: Url,
    replacements: usize,
}

impl MemoryAddressBar {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            replacements: 0,
        }
    }

    pub fn parse(raw: &str) -> crate::Result<Self> {
        Ok(Self::new(Url::parse(raw)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn replacements(&self) -> usize {
        self.replacements
    }
}

impl AddressBar for MemoryAddressBar {
    fn current(&self) -> Url {
        self.url.clone()
    }

    fn replace(&mut self, url: Url) {
        self.url = url;
        self.replacements += 1;
    }
}
