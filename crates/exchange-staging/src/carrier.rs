//! Placeholder source documents.
//!
//! A carrier is a schema-valid ISO 10303-21 file with an empty DATA
//! section. The SDK accepts it as the nominal source of a translation; the
//! real payload is substituted later from [`CarrierMapping`](crate::CarrierMapping).

use std::io::Read;
use std::path::Path;

use anyhow::Result;

use crate::paths::replace_staged_file;

const CARRIER_TEMPLATE: &str = "ISO-10303-21;
HEADER;
FILE_DESCRIPTION(('exchange-publish carrier'),'2;1');
FILE_NAME('{name}','1970-01-01T00:00:00',(''),(''),'','','');
FILE_SCHEMA(('AUTOMOTIVE_DESIGN {1 0 10303 214 3 1 1}'));
ENDSEC;
DATA;
ENDSEC;
END-ISO-10303-21;
";

/// Render the carrier document for `asset_name`.
pub fn carrier_document(asset_name: &str) -> String {
    // Part 21 strings escape a quote by doubling it.
    CARRIER_TEMPLATE.replace("{name}", &asset_name.replace('\'', "''"))
}

/// Write a carrier file for `asset_name` at `path`.
pub fn write_carrier(path: &Path, asset_name: &str) -> Result<()> {
    replace_staged_file(path, carrier_document(asset_name).as_bytes())
}

const CARRIER_MARKER: &[u8] = b"FILE_DESCRIPTION(('exchange-publish carrier')";

/// Whether `path` holds a carrier (as opposed to real geometry).
///
/// Only the header is inspected, so large payloads are not read in full.
pub fn is_carrier(path: &Path) -> bool {
    let Ok(file) = std::fs::File::open(path) else {
        return false;
    };
    let mut head = Vec::with_capacity(256);
    if file.take(256).read_to_end(&mut head).is_err() {
        return false;
    }
    head.windows(CARRIER_MARKER.len())
        .any(|window| window == CARRIER_MARKER)
}
