//! The single public entry point this crate exposes: hand it a parsed
//! metainfo, an output path, and a configuration, and it drives the
//! download to completion or failure.

use std::path::Path;

use crate::conf::Conf;
use crate::coordinator;
use crate::error::Result;
use crate::metainfo::Metainfo;

/// Downloads the torrent described by `metainfo` to `output_path`.
///
/// This is a one-shot leech: it announces to the tracker exactly once,
/// downloads every piece, writes the result, and returns. There is no
/// resume support and no re-announce loop.
pub async fn download(metainfo: &Metainfo, output_path: &Path, conf: &Conf) -> Result<()> {
    coordinator::run(metainfo, output_path, conf).await
}
