//! Mutation mapping for the rekordbox export schema. Everything lives in
//! TRACK attributes: bpm as `AverageBpm` with 2 decimals, keys as free text
//! in `Tonality`, grid markers as nested TEMPO elements with positions in
//! seconds.

use crate::export::{ApplyOutcome, DialectMapping};
use crate::fixes::FixOperation;
use crate::library::rekordbox::DECLARATION;
use crate::library::xml::XmlElement;
use crate::TrackSource;

pub struct RekordboxMapping;

impl DialectMapping for RekordboxMapping {
    fn source(&self) -> TrackSource {
        TrackSource::Rekordbox
    }

    fn declaration(&self) -> &'static str {
        DECLARATION
    }

    fn entry_name(&self) -> &'static str {
        "TRACK"
    }

    fn count_attr(&self) -> &'static str {
        "Entries"
    }

    fn native_id(&self, el: &XmlElement) -> Option<String> {
        el.attr_text("TrackID").map(str::to_string)
    }

    fn apply(&self, el: &mut XmlElement, operation: &FixOperation) -> ApplyOutcome {
        match operation {
            FixOperation::Bpm { bpm } => {
                el.set_attr("AverageBpm", format!("{:.2}", bpm));
                if let Some(tempo) = el.child_mut("TEMPO") {
                    tempo.set_attr("Bpm", format!("{:.2}", bpm));
                }
                ApplyOutcome::Applied
            }
            FixOperation::Key { key } => {
                el.set_attr("Tonality", key.name());
                ApplyOutcome::Applied
            }
            FixOperation::Beatgrid { markers } => {
                el.remove_elements(|child| child.name == "TEMPO");
                for marker in markers {
                    let mut tempo = XmlElement::new("TEMPO");
                    tempo.set_attr("Inizio", format!("{:.3}", marker.position_secs));
                    tempo.set_attr("Bpm", format!("{:.2}", marker.bpm));
                    tempo.set_attr("Metro", marker.meter.clone());
                    tempo.set_attr("Battito", marker.beat.to_string());
                    el.push_element(tempo);
                }
                if let Some(first) = markers.first() {
                    el.set_attr("AverageBpm", format!("{:.2}", first.bpm));
                }
                ApplyOutcome::Applied
            }
            FixOperation::ClippingNormalize { .. } => {
                ApplyOutcome::Unsupported("rekordbox tracks carry no loudness attribute")
            }
            FixOperation::DuplicateRemove => {
                ApplyOutcome::Unsupported("removal is handled structurally")
            }
        }
    }
}
