//! Launch-URL handling.

use reqwest::Url;

use crate::error::{FluxError, Result};

/// Query parameter carrying the seed text for a new conversation.
pub const NEW_TREE_PARAM: &str = "newTreeWith";

/// Read `newTreeWith` from a launch URL and return it together with the URL
/// minus its query, so a reload does not start the same tree twice.
///
/// An empty parameter counts as absent.
pub fn take_new_tree_param(url: &str) -> Result<(Option<String>, String)> {
    let mut parsed = Url::parse(url).map_err(|e| FluxError::InvalidUrl(format!("{url}: {e}")))?;

    let content = parsed
        .query_pairs()
        .find(|(key, _)| key == NEW_TREE_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    parsed.set_query(None);
    Ok((content, parsed.to_string()))
}
