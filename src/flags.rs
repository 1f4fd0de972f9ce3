use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// Windows `FileAttributes` bits smbclient knows by letter
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attributes(u32);

bitflags! {
    impl Attributes: u32 {
        const READONLY = 0x00000001;
        const HIDDEN = 0x00000002;
        const SYSTEM = 0x00000004;
        const DIRECTORY = 0x00000010;
        const ARCHIVE = 0x00000020;
        const NORMAL = 0x00000080;
    }
}

/// Bits that `setmode` can change
const SETTABLE: Attributes = Attributes::READONLY
    .union(Attributes::SYSTEM)
    .union(Attributes::HIDDEN)
    .union(Attributes::ARCHIVE);

/// smbclient's listing order
const LETTERS: [(char, Attributes); 6] = [
    ('D', Attributes::DIRECTORY),
    ('A', Attributes::ARCHIVE),
    ('H', Attributes::HIDDEN),
    ('S', Attributes::SYSTEM),
    ('R', Attributes::READONLY),
    ('N', Attributes::NORMAL),
];

/// `setmode` argument order
const MODE_LETTERS: [(char, Attributes); 4] = [
    ('r', Attributes::READONLY),
    ('s', Attributes::SYSTEM),
    ('h', Attributes::HIDDEN),
    ('a', Attributes::ARCHIVE),
];

/// A single attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    Readonly,
    Hidden,
    System,
    Archive,
    Directory,
}

impl Flag {
    fn bits(self) -> Attributes {
        match self {
            Self::Readonly => Attributes::READONLY,
            Self::Hidden => Attributes::HIDDEN,
            Self::System => Attributes::SYSTEM,
            Self::Archive => Attributes::ARCHIVE,
            Self::Directory => Attributes::DIRECTORY,
        }
    }
}

impl FromStr for Flag {
    type Err = ();

    /// Parses the single-letter form, in either case
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "R" => Ok(Self::Readonly),
            "H" => Ok(Self::Hidden),
            "S" => Ok(Self::System),
            "A" => Ok(Self::Archive),
            "D" => Ok(Self::Directory),
            _ => Err(()),
        }
    }
}

fn letter_bits(c: char) -> Option<Attributes> {
    LETTERS
        .iter()
        .find(|(letter, _)| *letter == c)
        .map(|(_, bits)| *bits)
}

/// Immutable attribute set of a remote entry.
///
/// The letter string is kept as the server sent it, unknown letters
/// included, so an unchanged value prints back exactly. Letters switched
/// on later are appended in listing order. Mask bits this crate does not
/// know are carried along untouched.
#[derive(Debug, Default, Clone)]
pub struct FileFlags {
    known: Attributes,
    letters: String,
    other_bits: u32,
}

impl FileFlags {
    /// Parses smbclient's letter string, e.g. `"DH"` or `"A"`
    pub fn from_smb_str(s: &str) -> Self {
        let known = s
            .chars()
            .filter_map(letter_bits)
            .fold(Attributes::empty(), |acc, bits| acc | bits);

        Self {
            known,
            letters: s.to_owned(),
            other_bits: 0,
        }
    }

    pub fn to_smb_string(&self) -> String {
        self.letters.clone()
    }

    fn unknown_letters(&self) -> impl Iterator<Item = char> + '_ {
        self.letters.chars().filter(|c| letter_bits(*c).is_none())
    }

    /// A copy holding exactly `known`, keeping the order of letters that
    /// stay set.
    fn with_known(&self, known: Attributes) -> Self {
        let mut letters: String = self
            .letters
            .chars()
            .filter(|c| letter_bits(*c).map_or(true, |bits| known.contains(bits)))
            .collect();

        for (letter, bits) in LETTERS {
            if known.contains(bits) && !letters.contains(letter) {
                letters.push(letter);
            }
        }

        Self {
            known,
            letters,
            other_bits: self.other_bits,
        }
    }

    /// Parses a Win32 `FileAttributes` value such as `00000020` or `0x21`.
    /// Returns `None` when the value is not hexadecimal.
    pub fn from_win32_mask(mask: &str) -> Option<Self> {
        let mask = mask.trim();
        let digits = mask
            .strip_prefix("0x")
            .or_else(|| mask.strip_prefix("0X"))
            .unwrap_or(mask);

        let value = u32::from_str_radix(digits, 16).ok()?;
        let known = Attributes::from_bits_truncate(value);

        Some(
            Self {
                other_bits: value & !known.bits(),
                ..Self::default()
            }
            .with_known(known),
        )
    }

    /// Eight lowercase hex digits, as exposed through `Win32FileAttributes`
    pub fn to_win32_mask(&self) -> String {
        format!("{:08x}", self.known.bits() | self.other_bits)
    }

    /// Takes the settable bits from `mask`, keeping everything else.
    pub fn with_win32_mask(&self, mask: &str) -> Option<Self> {
        let parsed = Self::from_win32_mask(mask)?;
        Some(self.with_known((self.known - SETTABLE) | (parsed.known & SETTABLE)))
    }

    pub fn get(&self, flag: Flag) -> bool {
        self.known.contains(flag.bits())
    }

    /// Returns a copy with `flag` switched on or off
    #[must_use]
    pub fn set(&self, flag: Flag, on: bool) -> Self {
        let mut known = self.known;
        known.set(flag.bits(), on);
        self.with_known(known)
    }

    /// What a successful `setmode` with `token` leaves behind
    #[must_use]
    pub fn apply(&self, token: &ModeToken) -> Self {
        match token.op {
            ModeOp::Add => self.with_known(self.known | token.bits),
            ModeOp::Remove => self.with_known(self.known - token.bits),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.get(Flag::Directory)
    }

    pub fn is_hidden(&self) -> bool {
        self.get(Flag::Hidden)
    }

    pub fn is_readonly(&self) -> bool {
        self.get(Flag::Readonly)
    }

    /// Mode tokens that turn `self` into `target` with `setmode`.
    ///
    /// At most one token adds and one removes; the add comes first.
    pub fn diff(&self, target: &Self) -> Vec<ModeToken> {
        let added = (target.known - self.known) & SETTABLE;
        let removed = (self.known - target.known) & SETTABLE;

        [(ModeOp::Add, added), (ModeOp::Remove, removed)]
            .into_iter()
            .filter(|(_, bits)| !bits.is_empty())
            .map(|(op, bits)| ModeToken { op, bits })
            .collect()
    }
}

impl PartialEq for FileFlags {
    fn eq(&self, other: &Self) -> bool {
        self.known == other.known
            && self.other_bits == other.other_bits
            && self.unknown_letters().eq(other.unknown_letters())
    }
}

impl Eq for FileFlags {}

impl Hash for FileFlags {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.known.hash(state);
        self.other_bits.hash(state);
        for c in self.unknown_letters() {
            c.hash(state);
        }
    }
}

impl fmt::Display for FileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_smb_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOp {
    Add,
    Remove,
}

/// One `setmode` instruction, rendered like `+hs` or `-r`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeToken {
    pub op: ModeOp,
    bits: Attributes,
}

impl ModeToken {
    pub fn new(op: ModeOp, flags: &[Flag]) -> Self {
        let bits = flags
            .iter()
            .fold(Attributes::empty(), |acc, flag| acc | flag.bits())
            & SETTABLE;

        Self { op, bits }
    }
}

impl fmt::Display for ModeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.op {
            ModeOp::Add => '+',
            ModeOp::Remove => '-',
        };

        let letters: String = MODE_LETTERS
            .iter()
            .filter(|(_, bits)| self.bits.contains(*bits))
            .map(|(letter, _)| *letter)
            .collect();

        write!(f, "{sign}{letters}")
    }
}
