//! Mutation mapping for the Traktor NML schema. Values live in child
//! elements: `TEMPO@BPM` with 6 decimals, `MUSICAL_KEY@VALUE` as the 0-23
//! enumeration, grid anchors as `CUE_V2` elements with millisecond `START`
//! positions, loudness in `LOUDNESS@PEAK_DB`.

use crate::export::{ApplyOutcome, DialectMapping};
use crate::fixes::FixOperation;
use crate::library::traktor::{DECLARATION, GRID_CUE_TYPE};
use crate::library::xml::XmlElement;
use crate::TrackSource;

pub struct TraktorMapping;

/// Writes `attr` on the named child, creating the child when absent.
fn set_child_attr(el: &mut XmlElement, child: &str, attr: &str, value: String) {
    if let Some(existing) = el.child_mut(child) {
        existing.set_attr(attr, value);
        return;
    }
    let mut created = XmlElement::new(child);
    created.set_attr(attr, value);
    el.push_element(created);
}

impl DialectMapping for TraktorMapping {
    fn source(&self) -> TrackSource {
        TrackSource::Traktor
    }

    fn declaration(&self) -> &'static str {
        DECLARATION
    }

    fn entry_name(&self) -> &'static str {
        "ENTRY"
    }

    fn count_attr(&self) -> &'static str {
        "ENTRIES"
    }

    fn native_id(&self, el: &XmlElement) -> Option<String> {
        crate::library::traktor::native_id(el).map(str::to_string)
    }

    fn apply(&self, el: &mut XmlElement, operation: &FixOperation) -> ApplyOutcome {
        match operation {
            FixOperation::Bpm { bpm } => {
                set_child_attr(el, "TEMPO", "BPM", format!("{:.6}", bpm));
                ApplyOutcome::Applied
            }
            FixOperation::Key { key } => {
                set_child_attr(el, "MUSICAL_KEY", "VALUE", key.numeric().to_string());
                ApplyOutcome::Applied
            }
            FixOperation::Beatgrid { markers } => {
                el.remove_elements(|child| {
                    child.name == "CUE_V2" && child.attr("TYPE") == Some(GRID_CUE_TYPE)
                });
                for marker in markers {
                    let mut cue = XmlElement::new("CUE_V2");
                    cue.set_attr("NAME", "AutoGrid");
                    cue.set_attr("DISPL_ORDER", "0");
                    cue.set_attr("TYPE", GRID_CUE_TYPE);
                    cue.set_attr("START", format!("{:.6}", marker.position_secs * 1000.0));
                    cue.set_attr("LEN", "0.000000");
                    cue.set_attr("REPEATS", "-1");
                    cue.set_attr("HOTCUE", "0");
                    el.push_element(cue);
                }
                if let Some(first) = markers.first() {
                    set_child_attr(el, "TEMPO", "BPM", format!("{:.6}", first.bpm));
                }
                ApplyOutcome::Applied
            }
            FixOperation::ClippingNormalize { peak_db, gain_db } => {
                set_child_attr(el, "LOUDNESS", "PEAK_DB", format!("{:.6}", peak_db + gain_db));
                ApplyOutcome::Applied
            }
            FixOperation::DuplicateRemove => {
                ApplyOutcome::Unsupported("removal is handled structurally")
            }
        }
    }
}
