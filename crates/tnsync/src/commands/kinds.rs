use strum::IntoEnumIterator;

use tnsync_core::ResourceKind;

use crate::output;

/// Print every resource type `apply` accepts, one per line.
pub fn handle() {
    let names: Vec<String> = ResourceKind::iter().map(|k| k.to_string()).collect();
    output::print_output(&names.join("\n"));
}
