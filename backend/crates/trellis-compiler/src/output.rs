//! Whitelist file emission.

use crate::error::{CompilerError, Result};
use crate::sites::SiteSet;
use std::path::{Path, PathBuf};
use trellis_commons::{Whitelist, WhitelistEntry};

/// Default whitelist file name, written beside the source root.
pub const WHITELIST_FILE: &str = "trellis.whitelist.json";

/// Default output path for a source root.
pub fn default_output_path(root: &Path) -> PathBuf {
    root.join(WHITELIST_FILE)
}

/// Build the whitelist from the merged site set.
pub fn build_whitelist(sites: &SiteSet) -> Whitelist {
    let mut whitelist = Whitelist::new();
    for query in sites.iter() {
        whitelist.insert(WhitelistEntry::from(query));
    }
    whitelist
}

/// Write the whitelist file.
pub fn write_whitelist(whitelist: &Whitelist, path: &Path) -> Result<()> {
    whitelist
        .store(path)
        .map_err(|e| CompilerError::Output(e.to_string()))?;
    log::info!(
        "Wrote {} whitelist entr{} to {}",
        whitelist.len(),
        if whitelist.len() == 1 { "y" } else { "ies" },
        path.display()
    );
    Ok(())
}
