//! The persisted layout of a dataset.
//!
//! An `IdxFile` says everything needed to locate a sample on storage without scanning anything: the logical box and its
//! `Bitmask`, the fields, how HZ addresses are grouped into blocks (`bitsperblock`) and blocks into files (`blocksperfile`,
//! `block_interleaving`), and how files are named.
//!
//! Two encodings are supported, picked by `load` from the content and by `save` from the extension:
//!
//! - a JSON document, the primary format
//! - the legacy parenthesised text format of `.idx` files
//!
//! ```text
//! (version)
//! 6
//! (box)
//! 0 15 0 15 0 15
//! (fields)
//! data uint8 default_compression(lz4) format(0) default_value(0)
//! (bits)
//! V012012012012
//! (bitsperblock)
//! 12
//! (blocksperfile)
//! 1
//! (interleave block)
//! 1
//! (filename_template)
//! ./visus/%04x.bin
//! ```

mod legacy;

use crate::{Field, IdxError, Result};

use hzblocks_core::{Bitmask, BoxNi};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_VERSION: i32 = 6;

/// Uncompressed bytes per file targeted when `blocksperfile` is guessed.
const TARGET_UNCOMPRESSED_FILESIZE: usize = 32 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct IdxFile {
    #[serde(default)]
    pub version: i32,
    #[serde(default)]
    pub bitmask: Bitmask,
    pub logic_box: BoxNi,
    pub fields: Vec<Field>,
    #[serde(default)]
    pub bitsperblock: usize,
    /// -1 puts every block in one file, 0 guesses.
    #[serde(default)]
    pub blocksperfile: i64,
    #[serde(default = "default_interleaving")]
    pub block_interleaving: i64,
    #[serde(default)]
    pub filename_template: String,
    #[serde(default)]
    pub time_template: String,
    #[serde(default)]
    pub timesteps: Vec<f64>,
    /// Reads of blocks that were never written leave the default value in place instead of failing.
    #[serde(default)]
    pub missing_blocks: bool,
}

fn default_interleaving() -> i64 {
    1
}

impl IdxFile {
    /// A layout to be completed by `validate`.
    pub fn new(logic_box: BoxNi, fields: Vec<Field>) -> Self {
        Self {
            version: 0,
            bitmask: Bitmask::default(),
            logic_box,
            fields,
            bitsperblock: 0,
            blocksperfile: 0,
            block_interleaving: 1,
            filename_template: String::new(),
            time_template: String::new(),
            timesteps: Vec::new(),
            missing_blocks: false,
        }
    }

    pub fn with_bitmask(mut self, bitmask: Bitmask) -> Self {
        self.bitmask = bitmask;
        self
    }

    pub fn with_bitsperblock(mut self, bitsperblock: usize) -> Self {
        self.bitsperblock = bitsperblock;
        self
    }

    pub fn with_blocksperfile(mut self, blocksperfile: i64) -> Self {
        self.blocksperfile = blocksperfile;
        self
    }

    pub fn with_timesteps(mut self, timesteps: Vec<f64>) -> Self {
        self.timesteps = timesteps;
        self
    }

    pub fn with_filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename_template = template.into();
        self
    }

    pub fn with_missing_blocks(mut self, missing_blocks: bool) -> Self {
        self.missing_blocks = missing_blocks;
        self
    }

    #[inline]
    pub fn max_resolution(&self) -> usize {
        self.bitmask.max_resolution()
    }

    /// Number of blocks covering the whole HZ range.
    #[inline]
    pub fn total_blocks(&self) -> u64 {
        1 << (self.max_resolution() - self.bitsperblock)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fills in every guessed value and checks the layout. `url` names the idx file and seeds the default filename template.
    pub fn validate(&mut self, url: &str) -> Result<()> {
        if self.version == 0 {
            self.version = DEFAULT_VERSION;
        }
        if self.version < 0 {
            return Err(IdxError::invalid_layout(format!("wrong version {}", self.version)));
        }

        if !self.logic_box.is_full_dim() {
            return Err(IdxError::invalid_layout(format!("wrong box {}", self.logic_box)));
        }

        if self.bitmask.is_empty() {
            self.bitmask = Bitmask::guess('V', &self.logic_box.p2, false);
        }
        if !self.bitmask.valid() {
            return Err(IdxError::invalid_bitmask(format!(
                "{:?} does not describe a hierarchy",
                self.bitmask.pattern()
            )));
        }
        if self.bitmask.pdim() != self.logic_box.pdim() {
            return Err(IdxError::invalid_bitmask(format!(
                "{} has {} axes but the box has {}",
                self.bitmask,
                self.bitmask.pdim(),
                self.logic_box.pdim()
            )));
        }
        if !self.bitmask.pow2_box().contains_box(&self.logic_box) {
            return Err(IdxError::invalid_bitmask(format!(
                "{} does not cover the box {}",
                self.bitmask, self.logic_box
            )));
        }

        let maxh = self.max_resolution();
        if self.bitsperblock == 0 {
            self.bitsperblock = maxh.min(16);
        }
        if self.bitsperblock == 0 {
            return Err(IdxError::invalid_layout("wrong bitsperblock 0"));
        }
        self.bitsperblock = self.bitsperblock.min(maxh);

        let totblocks = self.total_blocks() as i64;
        if self.blocksperfile == -1 {
            self.blocksperfile = totblocks;
        } else if self.blocksperfile == 0 {
            let overall_blockdim: usize = self
                .fields
                .iter()
                .map(|f| f.dtype.byte_size(1 << self.bitsperblock))
                .sum();
            self.blocksperfile =
                (TARGET_UNCOMPRESSED_FILESIZE / overall_blockdim.max(1)).min(totblocks as usize) as i64;
        }
        if self.blocksperfile <= 0 {
            return Err(IdxError::invalid_layout(format!(
                "wrong blocksperfile {}",
                self.blocksperfile
            )));
        }

        if self.fields.is_empty() {
            return Err(IdxError::invalid_layout("no fields"));
        }
        for (index, field) in self.fields.iter_mut().enumerate() {
            if !field.valid() {
                return Err(IdxError::invalid_layout(format!("wrong field {:?}", field.name)));
            }
            field.index = index;
        }

        if self.block_interleaving < 1 {
            self.block_interleaving = 1;
        }

        if self.timesteps.is_empty() {
            self.timesteps.push(0.0);
        }
        if self.time_template.is_empty() && self.timesteps.len() > 1 {
            self.time_template = "time%04d/".to_string();
        }

        if self.filename_template.is_empty() {
            self.filename_template = self.guess_filename_template(url);
        }
        if let Some(c) = self
            .filename_template
            .match_indices('%')
            .find(|(c, _)| component_digits(&self.filename_template[*c..]) == 0)
            .map(|(c, _)| c)
        {
            return Err(IdxError::invalid_layout(format!(
                "zero-width component at {} of filename template {:?}",
                c, self.filename_template
            )));
        }

        Ok(())
    }

    /// `./<basename>` with one `%02x` directory per 8 block bits beyond 16, then `%04x.bin`.
    fn guess_filename_template(&self, url: &str) -> String {
        let basename = Path::new(url)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("visus_data");

        let mut template = format!("./{}", basename);
        let mut nbits = self.max_resolution() - self.bitsperblock;
        while nbits > 16 {
            template.push_str("/%02x");
            nbits -= 8;
        }
        template.push_str("/%04x.bin");

        template
    }

    /// The slot of a block in the header of its file.
    #[inline]
    pub fn block_position_in_file(&self, blockid: u64) -> u64 {
        (blockid / self.interleaving()) % self.blocksperfile as u64
    }

    /// The id of the block whose number names the file holding `blockid`.
    #[inline]
    pub fn first_block_in_file(&self, blockid: u64) -> u64 {
        blockid - self.interleaving() * self.block_position_in_file(blockid)
    }

    #[inline]
    fn interleaving(&self) -> u64 {
        self.block_interleaving.max(1) as u64
    }

    /// The file holding `blockid` at `time`. All fields of a block share a file.
    ///
    /// Each `%0Nx` of the template, from right to left, takes the next `4N` low bits of the first block in the file as `N`
    /// hex digits. Bits left over after the leftmost component become extra directories of the same width. The time template
    /// goes in front of the block components.
    pub fn filename(&self, _field: &Field, time: f64, blockid: u64) -> String {
        let template = self.filename_template.as_str();
        if !template.contains('%') {
            return template.to_string();
        }

        let mut address = self.first_block_in_file(blockid);
        let mut parts: Vec<String> = Vec::new();
        let mut rest = template;
        let mut leftmost_digits = 0;
        while let Some(c) = rest.rfind('%') {
            let digits = component_digits(&rest[c..]);
            let suffix_start = (c + 4).min(rest.len());
            parts.push(rest[suffix_start..].to_string());
            parts.push(hex_digits(address, digits));
            address = shift_right(address, 4 * digits);
            leftmost_digits = digits;
            rest = &rest[..c];
        }
        while address != 0 && leftmost_digits != 0 {
            parts.push("/".to_string());
            parts.push(hex_digits(address, leftmost_digits));
            address = shift_right(address, 4 * leftmost_digits);
        }
        if !self.time_template.is_empty() {
            parts.push(format_time(&self.time_template, time));
        }
        parts.push(rest.to_string());

        parts.iter().rev().map(String::as_str).collect()
    }

    /// Reads a JSON document (content starting with `{`) or the legacy text format, then validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut idxfile = Self::from_str_content(&content)?;
        idxfile.validate(&path.to_string_lossy())?;

        Ok(idxfile)
    }

    fn from_str_content(content: &str) -> Result<Self> {
        let trimmed = content.trim_start();
        if trimmed.is_empty() {
            return Err(IdxError::parse("empty idx file"));
        }
        if trimmed.starts_with('{') {
            Ok(serde_json::from_str(trimmed)?)
        } else {
            legacy::parse(trimmed)
        }
    }

    /// Writes the legacy text format when the extension is `.idx`, JSON otherwise.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if path.extension().map_or(false, |e| e == "idx") {
            self.to_legacy_string()
        } else {
            self.to_json_string()?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_legacy_string(&self) -> String {
        legacy::write(self)
    }

    pub fn from_legacy_str(content: &str) -> Result<Self> {
        legacy::parse(content)
    }
}

/// The `N` of a `%0Nx` component. A missing width means 4.
fn component_digits(component: &str) -> u32 {
    component
        .chars()
        .nth(2)
        .and_then(|ch| ch.to_digit(10))
        .unwrap_or(4)
}

#[inline]
fn shift_right(address: u64, nbits: u32) -> u64 {
    address.checked_shr(nbits).unwrap_or(0)
}

fn hex_digits(address: u64, digits: u32) -> String {
    let mask = if 4 * digits >= 64 {
        u64::MAX
    } else {
        (1u64 << (4 * digits)) - 1
    };

    format!("{:0width$x}", address & mask, width = digits as usize)
}

/// Expands the first `%d` or `%0Nd` of a printf-like template with the integer part of `time`.
fn format_time(template: &str, time: f64) -> String {
    let t = time as i64;
    let start = match template.find('%') {
        Some(start) => start,
        None => return template.to_string(),
    };
    let conversion = &template[start + 1..];
    let end = match conversion.find('d') {
        Some(end) => end,
        None => return template.to_string(),
    };
    let flags = &conversion[..end];
    let formatted = if let Some(width) = flags.strip_prefix('0') {
        let width: usize = width.parse().unwrap_or(0);
        format!("{:0width$}", t, width = width)
    } else {
        let width: usize = flags.parse().unwrap_or(0);
        format!("{:width$}", t, width = width)
    };

    format!("{}{}{}", &template[..start], formatted, &conversion[end + 1..])
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::{BaseType, DType};

    use hzblocks_core::PointNi;
    use pretty_assertions::assert_eq;

    fn cube(n: i64) -> IdxFile {
        IdxFile::new(
            BoxNi::new(PointNi::zero(3), PointNi::fill(3, n)),
            vec![Field::new("data", DType::scalar(BaseType::U8))],
        )
    }

    #[test]
    fn validate_guesses_missing_values() {
        let mut idx = cube(16);
        idx.validate("/tmp/visus.idx").unwrap();

        assert_eq!(idx.version, 6);
        assert_eq!(idx.bitmask.pattern(), "V012012012012");
        assert_eq!(idx.bitsperblock, 12);
        assert_eq!(idx.blocksperfile, 1);
        assert_eq!(idx.timesteps, vec![0.0]);
        assert_eq!(idx.filename_template, "./visus/%04x.bin");
        assert!(idx.time_template.is_empty());
    }

    #[test]
    fn validate_caps_bitsperblock() {
        let mut idx = cube(4).with_bitsperblock(30);
        idx.validate("x.idx").unwrap();

        assert_eq!(idx.bitsperblock, 6);
        assert_eq!(idx.total_blocks(), 1);
    }

    #[test]
    fn validate_rejects_bad_layouts() {
        let mut no_fields = IdxFile::new(BoxNi::new(PointNi::zero(2), PointNi::fill(2, 4)), vec![]);
        assert!(matches!(no_fields.validate("x"), Err(IdxError::InvalidLayout(_))));

        let mut bad_bitmask = cube(4).with_bitmask(Bitmask::from_pattern("V01"));
        assert!(matches!(bad_bitmask.validate("x"), Err(IdxError::InvalidBitmask(_))));

        let mut empty_box = cube(0);
        assert!(empty_box.validate("x").is_err());
    }

    #[test]
    fn several_timesteps_get_a_time_template() {
        let mut idx = cube(4).with_timesteps(vec![0.0, 1.0, 2.0]);
        idx.validate("x").unwrap();

        assert_eq!(idx.time_template, "time%04d/");
    }

    #[test]
    fn deep_hierarchies_get_directory_components() {
        let mut idx = IdxFile::new(
            BoxNi::new(PointNi::zero(2), PointNi::fill(2, 1 << 15)),
            vec![Field::new("data", DType::scalar(BaseType::U8))],
        )
        .with_bitsperblock(8)
        .with_blocksperfile(1);
        idx.validate("dir/big.idx").unwrap();

        // 30 - 8 = 22 block bits: one directory level.
        assert_eq!(idx.filename_template, "./big/%02x/%04x.bin");
        let field = idx.fields[0].clone();
        assert_eq!(idx.filename(&field, 0.0, 0x12345), "./big/01/2345.bin");
        assert_eq!(idx.filename(&field, 0.0, 0x20_0000), "./big/20/0000.bin");
    }

    #[test]
    fn leftover_bits_recycle_the_leftmost_component() {
        let mut idx = cube(64)
            .with_bitsperblock(6)
            .with_blocksperfile(1)
            .with_filename_template("./r/%02x.bin");
        idx.validate("x").unwrap();
        let field = idx.fields[0].clone();

        assert_eq!(idx.filename(&field, 0.0, 0x23), "./r/23.bin");
        assert_eq!(idx.filename(&field, 0.0, 0x123), "./r/01/23.bin");
    }

    #[test]
    fn filename_groups_blocks_per_file() {
        let mut idx = cube(64)
            .with_bitsperblock(6)
            .with_blocksperfile(16)
            .with_timesteps(vec![0.0, 1.0]);
        idx.validate("a.idx").unwrap();
        let field = idx.fields[0].clone();

        assert_eq!(idx.filename(&field, 1.0, 0), "./a/time0001/0000.bin");
        assert_eq!(idx.filename(&field, 1.0, 15), "./a/time0001/0000.bin");
        assert_eq!(idx.filename(&field, 1.0, 16), "./a/time0001/0010.bin");
        assert_eq!(idx.block_position_in_file(17), 1);
        assert_eq!(idx.first_block_in_file(17), 16);
    }

    #[test]
    fn interleaving_spreads_neighbours_over_files() {
        let mut idx = cube(64).with_bitsperblock(6).with_blocksperfile(4);
        idx.block_interleaving = 2;
        idx.validate("a.idx").unwrap();

        assert_eq!(idx.block_position_in_file(0), 0);
        assert_eq!(idx.block_position_in_file(1), 0);
        assert_eq!(idx.block_position_in_file(2), 1);
        assert_ne!(idx.first_block_in_file(0), idx.first_block_in_file(1));
    }

    #[test]
    fn template_without_placeholder_is_one_file() {
        let mut idx = cube(16).with_filename_template("./all.bin");
        idx.validate("x").unwrap();

        assert_eq!(idx.filename(&idx.fields[0], 0.0, 3), "./all.bin");
    }

    #[test]
    fn zero_width_components_are_rejected() {
        let mut idx = cube(16).with_filename_template("./z/%00x.bin");
        assert!(matches!(idx.validate("x"), Err(IdxError::InvalidLayout(_))));

        let mut idx = cube(16).with_filename_template("./z/%02x/%00x.bin");
        assert!(matches!(idx.validate("x"), Err(IdxError::InvalidLayout(_))));
    }

    #[test]
    fn time_formats() {
        assert_eq!(format_time("time%04d/", 7.0), "time0007/");
        assert_eq!(format_time("t%d_", 12.9), "t12_");
        assert_eq!(format_time("fixed/", 3.0), "fixed/");
    }

    #[test]
    fn json_round_trip() {
        let mut idx = cube(16).with_missing_blocks(true);
        idx.fields.push(
            Field::new("rgb", DType::new(BaseType::U8, 3))
                .with_compression("lz4")
                .with_range(0.0, 255.0),
        );
        idx.validate("x").unwrap();

        let json = idx.to_json_string().unwrap();
        let mut parsed = IdxFile::from_json_str(&json).unwrap();
        parsed.validate("x").unwrap();

        assert_eq!(parsed, idx);
    }
}
