use serde::Serialize;

/// Musical key as pitch class (0 = C .. 11 = B) plus scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MusicalKey {
    pub pitch_class: u8,
    pub scale: Scale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Scale {
    Major,
    Minor,
}

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

impl MusicalKey {
    pub fn new(pitch_class: u8, scale: Scale) -> Self {
        Self {
            pitch_class: pitch_class % 12,
            scale,
        }
    }

    /// Accepts standard names ("Am", "F# minor", "Db maj"), Camelot ("8A"),
    /// Open Key ("1d"/"10m"), and the 0-23 numeric encoding some exports use.
    pub fn parse(input: &str) -> Option<Self> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(key) = Self::parse_wheel(text) {
            return Some(key);
        }
        if let Ok(value) = text.parse::<u8>() {
            return Self::from_numeric(value);
        }
        Self::parse_name(text)
    }

    // Camelot ("8A") and Open Key ("1d") share the digits-then-letter shape.
    fn parse_wheel(text: &str) -> Option<Self> {
        let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        let rest = &text[digits.len()..];
        if rest.len() != 1 {
            return None;
        }
        let number: u8 = digits.parse().ok()?;
        if !(1..=12).contains(&number) {
            return None;
        }
        match rest.chars().next()? {
            'A' | 'a' => Some(Self::from_camelot(number, Scale::Minor)),
            'B' | 'b' => Some(Self::from_camelot(number, Scale::Major)),
            // Open Key counts seven positions ahead of Camelot on the wheel.
            'd' => Some(Self::from_camelot((number + 6) % 12 + 1, Scale::Major)),
            'm' => Some(Self::from_camelot((number + 6) % 12 + 1, Scale::Minor)),
            _ => None,
        }
    }

    fn parse_name(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let base: i8 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let mut rest: &str = chars.as_str();
        let mut pitch = base;
        if let Some(first) = rest.chars().next() {
            match first {
                '#' | '♯' => {
                    pitch += 1;
                    rest = &rest[first.len_utf8()..];
                }
                'b' | '♭' => {
                    pitch -= 1;
                    rest = &rest[first.len_utf8()..];
                }
                _ => {}
            }
        }
        let suffix = rest.trim().trim_start_matches(['-', '_']).trim().to_lowercase();
        let scale = match suffix.as_str() {
            "" | "maj" | "major" | "dur" => Scale::Major,
            "m" | "min" | "minor" | "mol" | "moll" => Scale::Minor,
            _ => return None,
        };
        Some(Self::new(((pitch + 12) % 12) as u8, scale))
    }

    /// The 0-23 encoding: 0-11 are C..B major, 12-23 are C..B minor.
    pub fn from_numeric(value: u8) -> Option<Self> {
        match value {
            0..=11 => Some(Self::new(value, Scale::Major)),
            12..=23 => Some(Self::new(value - 12, Scale::Minor)),
            _ => None,
        }
    }

    pub fn numeric(&self) -> u8 {
        match self.scale {
            Scale::Major => self.pitch_class,
            Scale::Minor => self.pitch_class + 12,
        }
    }

    pub fn name(&self) -> String {
        let base = SHARP_NAMES[self.pitch_class as usize];
        match self.scale {
            Scale::Major => base.to_string(),
            Scale::Minor => format!("{}m", base),
        }
    }

    pub fn camelot_number(&self) -> u8 {
        // Neighbours on the wheel are a fifth apart; 7 is its own inverse mod 12.
        let anchor = match self.scale {
            Scale::Minor => 9, // Am = 8A
            Scale::Major => 0, // C = 8B
        };
        let steps = (7 * (self.pitch_class as u32 + 12 - anchor)) % 12;
        ((steps + 7) % 12 + 1) as u8
    }

    pub fn camelot(&self) -> String {
        let letter = match self.scale {
            Scale::Minor => 'A',
            Scale::Major => 'B',
        };
        format!("{}{}", self.camelot_number(), letter)
    }

    pub fn open_key(&self) -> String {
        let number = (self.camelot_number() + 4) % 12 + 1;
        let letter = match self.scale {
            Scale::Major => 'd',
            Scale::Minor => 'm',
        };
        format!("{}{}", number, letter)
    }

    fn from_camelot(number: u8, scale: Scale) -> Self {
        let anchor = match scale {
            Scale::Minor => 9,
            Scale::Major => 0,
        };
        // Invert the camelot_number mapping: each wheel step is +7 semitones.
        let pitch = (anchor + 7 * (number as u32 + 12 - 8)) % 12;
        Self::new(pitch as u8, scale)
    }

    /// Same Camelot number, opposite letter: relative major/minor pair.
    pub fn is_relative_of(&self, other: &MusicalKey) -> bool {
        self.scale != other.scale && self.camelot_number() == other.camelot_number()
    }
}

impl std::fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
