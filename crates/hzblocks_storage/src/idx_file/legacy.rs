//! The parenthesised text format of `.idx` files: a `(key)` line followed by its value lines. `#` starts a comment line.

use super::IdxFile;
use crate::{DType, Field, IdxError, Layout, Result};

use hzblocks_core::{Bitmask, BoxNi, PointNi};
use std::collections::BTreeMap;

pub fn write(idx: &IdxFile) -> String {
    let mut out = String::new();

    out.push_str(&format!("(version)\n{}\n", idx.version));

    let pdim = idx.logic_box.pdim();
    let corners: Vec<String> = (0..pdim)
        .map(|d| format!("{} {}", idx.logic_box.p1[d], idx.logic_box.p2[d] - 1))
        .collect();
    out.push_str(&format!("(box)\n{}\n", corners.join(" ")));

    out.push_str("(fields)\n");
    for (i, field) in idx.fields.iter().enumerate() {
        if i > 0 {
            out.push_str("+ ");
        }
        out.push_str(&format!("{} {} ", field.name, field.dtype));
        if !field.default_compression.is_empty() {
            out.push_str(&format!("default_compression({}) ", field.default_compression));
        }
        out.push_str(&format!("format({}) ", field.default_layout.code()));
        out.push_str(&format!("default_value({}) ", field.default_value));
        if !field.filter.is_empty() {
            out.push_str(&format!("filter({}) ", field.filter));
        }
        if let Some((min, max)) = field.range {
            out.push_str(&format!("min({}) max({}) ", min, max));
        }
        out.push('\n');
    }

    out.push_str(&format!("(bits)\n{}\n", idx.bitmask));
    out.push_str(&format!("(bitsperblock)\n{}\n", idx.bitsperblock));
    out.push_str(&format!("(blocksperfile)\n{}\n", idx.blocksperfile));
    out.push_str(&format!("(interleave block)\n{}\n", idx.block_interleaving));

    // A lone timestep 0 is what a missing section means.
    if !idx.time_template.is_empty() || idx.timesteps != [0.0] {
        out.push_str(&format!("(time)\n{}\n", time_value(idx)));
    }

    out.push_str(&format!("(filename_template)\n{}\n", idx.filename_template));
    if idx.missing_blocks {
        out.push_str("(missing_blocks)\ntrue\n");
    }

    out
}

/// `From To template` when the timesteps are consecutive integers, otherwise `template (From,To,Step)...`.
fn time_value(idx: &IdxFile) -> String {
    let steps = &idx.timesteps;
    let consecutive = !steps.is_empty()
        && steps.iter().all(|t| t.fract() == 0.0)
        && steps.windows(2).all(|w| w[1] - w[0] == 1.0);
    if consecutive {
        let value = format!("{} {} {}", steps[0], steps[steps.len() - 1], idx.time_template);
        return value.trim_end().to_string();
    }

    let ranges: Vec<String> = steps.iter().map(|t| format!("({},{},1)", t, t)).collect();

    format!("{} {}", idx.time_template, ranges.join(" "))
        .trim_start()
        .to_string()
}

pub fn parse(content: &str) -> Result<IdxFile> {
    let map = sections(content);
    let get = |key: &str| map.get(key).map(String::as_str);
    let parse_int = |key: &str| -> Result<i64> {
        match get(key) {
            Some(v) if !v.is_empty() => v
                .parse()
                .map_err(|_| IdxError::parse(format!("{} is not an integer: {:?}", key, v))),
            _ => Ok(0),
        }
    };

    let version = parse_int("(version)")? as i32;
    if !(1..=6).contains(&version) {
        return Err(IdxError::parse(format!("invalid version {}", version)));
    }

    let bitmask = Bitmask::from_pattern(get("(bits)").unwrap_or(""));
    if !bitmask.valid() {
        return Err(IdxError::invalid_bitmask(format!("{:?}", get("(bits)").unwrap_or(""))));
    }
    let logic_box = parse_box(bitmask.pdim(), get("(box)").unwrap_or(""))?;

    let fields = match get("(fields)") {
        Some(fields) => parse_fields(fields)?,
        None => Vec::new(),
    };

    let mut idx = IdxFile::new(logic_box, fields).with_bitmask(bitmask);
    idx.version = version;
    idx.bitsperblock = parse_int("(bitsperblock)")?.max(0) as usize;
    idx.blocksperfile = parse_int("(blocksperfile)")?;
    idx.filename_template = get("(filename_template)").unwrap_or("").to_string();
    for key in ["(interleave block)", "(interleave)"].iter() {
        if map.contains_key(*key) {
            idx.block_interleaving = parse_int(*key)?;
        }
    }
    if let Some(time) = get("(time)") {
        parse_time(&mut idx, time)?;
    }
    if let Some(missing) = get("(missing_blocks)") {
        idx.missing_blocks = matches!(missing.to_lowercase().as_str(), "1" | "true" | "yes");
    }

    Ok(idx)
}

/// Groups value lines under the `(key)` line before them.
fn sections(content: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let mut key: Option<String> = None;
    let mut value = String::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('(') {
            if let Some(key) = key.take() {
                map.insert(key, value.trim().to_string());
            }
            key = Some(line.to_string());
            value.clear();
        } else {
            value.push(' ');
            value.push_str(line);
        }
    }
    if let Some(key) = key {
        map.insert(key, value.trim().to_string());
    }

    map
}

/// `p1[0] p2[0]-1 p1[1] p2[1]-1 ...`. Extra trailing axes are ignored.
fn parse_box(pdim: usize, s: &str) -> Result<BoxNi> {
    let values = s
        .split_whitespace()
        .map(|v| v.parse::<i64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| IdxError::parse(format!("invalid box {:?}", s)))?;
    if values.len() < 2 * pdim {
        return Err(IdxError::parse(format!("box {:?} needs {} axes", s, pdim)));
    }

    let mut p1 = PointNi::zero(pdim);
    let mut p2 = PointNi::zero(pdim);
    for d in 0..pdim {
        p1[d] = values[2 * d];
        p2[d] = values[2 * d + 1] + 1;
    }

    Ok(BoxNi::new(p1, p2))
}

/// Fields are separated by `+` outside of brackets.
fn parse_fields(content: &str) -> Result<Vec<Field>> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut last = String::new();
    for ch in content.chars() {
        match ch {
            '+' if depth == 0 => {
                if !last.trim().is_empty() {
                    pieces.push(last.trim().to_string());
                }
                last.clear();
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        last.push(ch);
    }
    if !last.trim().is_empty() {
        pieces.push(last.trim().to_string());
    }

    pieces.iter().map(|s| parse_field(s)).collect()
}

fn parse_field(s: &str) -> Result<Field> {
    let mut tokens = s.split_whitespace();
    let name = tokens
        .next()
        .ok_or_else(|| IdxError::parse(format!("field without a name: {:?}", s)))?;
    let dtype: DType = tokens
        .next()
        .ok_or_else(|| IdxError::parse(format!("field {:?} without a dtype", name)))?
        .parse()?;

    let mut field = Field::new(name, dtype);

    field.default_compression = argument(s, "default_compression")
        .or_else(|| argument(s, "compressed"))
        .unwrap_or_default();

    let layout = argument(s, "default_layout")
        .or_else(|| argument(s, "format"))
        .unwrap_or_default();
    field.default_layout = Layout::from_token(&layout)?;

    if let Some(value) = argument(s, "default_value") {
        field.default_value = value
            .parse()
            .map_err(|_| IdxError::parse(format!("invalid default_value {:?}", value)))?;
    }
    field.filter = argument(s, "filter").unwrap_or_default();

    let first = |v: Option<String>| -> Option<f64> { v?.split_whitespace().next()?.parse().ok() };
    if let (Some(min), Some(max)) = (first(argument(s, "min")), first(argument(s, "max"))) {
        field.range = Some((min, max));
    }

    if !field.valid() {
        return Err(IdxError::parse(format!("invalid field {:?}", s)));
    }

    Ok(field)
}

/// The text inside `name(...)`, if `name(` appears as a whole word.
fn argument(s: &str, name: &str) -> Option<String> {
    let pattern = format!("{}(", name);
    let mut search = 0;
    while let Some(found) = s[search..].find(&pattern) {
        let start = search + found;
        let whole_word = start == 0 || s[..start].ends_with(char::is_whitespace);
        let open = start + pattern.len();
        if whole_word {
            let close = s[open..].find(')')?;
            return Some(s[open..open + close].trim().to_string());
        }
        search = open;
    }

    None
}

fn parse_time(idx: &mut IdxFile, value: &str) -> Result<()> {
    let bad = || IdxError::parse(format!("invalid (time) {:?}", value));
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.is_empty() || (tokens.len() < 2 && !tokens[0].starts_with('(')) {
        return Err(bad());
    }
    if tokens[0] == "*" {
        return Err(IdxError::not_supported("timesteps that are not listed in advance (* *)"));
    }

    idx.timesteps.clear();
    if let Ok(from) = tokens[0].parse::<f64>() {
        let to: f64 = tokens[1].parse().map_err(|_| bad())?;
        if tokens.len() > 3 {
            return Err(bad());
        }
        push_range(&mut idx.timesteps, from, to, 1.0);
        idx.time_template = tokens.get(2).map_or_else(String::new, |t| t.to_string());
    } else {
        // Without a template the ranges come first.
        let ranges = if tokens[0].starts_with('(') {
            idx.time_template.clear();
            &tokens[..]
        } else {
            idx.time_template = tokens[0].to_string();
            &tokens[1..]
        };
        for range in ranges.iter() {
            if !range.starts_with('(') || !range.ends_with(')') {
                return Err(bad());
            }
            let parts = range[1..range.len() - 1]
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(|p| p.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| bad())?;
            let from = parts.first().copied().unwrap_or(0.0);
            let to = parts.get(1).copied().unwrap_or(from);
            let step = parts.get(2).copied().unwrap_or(1.0);
            if step <= 0.0 {
                return Err(bad());
            }
            push_range(&mut idx.timesteps, from, to, step);
        }
    }

    Ok(())
}

fn push_range(timesteps: &mut Vec<f64>, from: f64, to: f64, step: f64) {
    let mut t = from;
    while t <= to {
        if !timesteps.contains(&t) {
            timesteps.push(t);
        }
        t += step;
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
