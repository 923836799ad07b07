//! Decoding of raw CPU captures
//!
//! Accepts the pprof protobuf either gzip-compressed (what the CPU backend
//! writes) or plain, and flattens it into a [`ParsedProfile`] whose string
//! indices and ids are already resolved.

use flate2::read::GzDecoder;
use pprof::protos::{self, Message};
use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use crate::domain::PipelineError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A sample type or period type, with its strings resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTypeName {
    pub kind: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMapping {
    pub start: u64,
    pub limit: u64,
    pub file: String,
}

/// One code location
///
/// `functions` lists the functions at this address, innermost inlined frame
/// first. An empty list means the location is not symbolized yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileLocation {
    pub address: u64,
    /// Index into [`ParsedProfile::mappings`]
    pub mapping: Option<usize>,
    pub functions: Vec<String>,
}

impl ProfileLocation {
    #[must_use]
    pub fn is_symbolized(&self) -> bool {
        !self.functions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSample {
    /// Indices into [`ParsedProfile::locations`], leaf first
    pub stack: Vec<usize>,
    /// One value per sample type
    pub values: Vec<i64>,
}

/// Decoded CPU capture, owned by one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedProfile {
    pub sample_types: Vec<ValueTypeName>,
    pub period_type: Option<ValueTypeName>,
    pub period: i64,
    pub duration: Duration,
    pub mappings: Vec<ProfileMapping>,
    pub locations: Vec<ProfileLocation>,
    pub samples: Vec<ProfileSample>,
}

impl ParsedProfile {
    /// Addresses of locations that still need a name, deduplicated
    #[must_use]
    pub fn unresolved_addresses(&self) -> Vec<u64> {
        let mut addresses: Vec<u64> = self
            .locations
            .iter()
            .filter(|l| !l.is_symbolized() && l.address != 0)
            .map(|l| l.address)
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }
}

/// Parse a raw capture
///
/// # Errors
/// Returns [`PipelineError::Parse`] if the input is empty, cannot be
/// decompressed or decoded, or references missing strings or ids.
pub fn parse_profile(raw: &[u8]) -> Result<ParsedProfile, PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::Parse("empty input file".to_string()));
    }

    let decompressed;
    let data = if raw.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        GzDecoder::new(raw)
            .read_to_end(&mut out)
            .map_err(|e| PipelineError::Parse(format!("decompressing profile: {e}")))?;
        decompressed = out;
        &decompressed[..]
    } else {
        raw
    };

    let profile = protos::Profile::decode(data)
        .map_err(|e| PipelineError::Parse(format!("parsing profile: {e}")))?;
    flatten(&profile)
}

fn flatten(profile: &protos::Profile) -> Result<ParsedProfile, PipelineError> {
    let strings = &profile.string_table;
    if strings.first().is_some_and(|s| !s.is_empty()) {
        return Err(PipelineError::Parse("string_table[0] must be ''".to_string()));
    }
    let string = |idx: i64| -> Result<String, PipelineError> {
        usize::try_from(idx)
            .ok()
            .and_then(|i| strings.get(i))
            .cloned()
            .ok_or_else(|| PipelineError::Parse(format!("string index {idx} out of range")))
    };
    let value_type = |vt: &protos::ValueType| -> Result<ValueTypeName, PipelineError> {
        Ok(ValueTypeName { kind: string(vt.ty)?, unit: string(vt.unit)? })
    };

    let sample_types =
        profile.sample_type.iter().map(value_type).collect::<Result<Vec<_>, _>>()?;
    let period_type = profile.period_type.as_ref().map(value_type).transpose()?;

    let mut mapping_index = HashMap::new();
    let mut mappings = Vec::with_capacity(profile.mapping.len());
    for mapping in &profile.mapping {
        mapping_index.insert(mapping.id, mappings.len());
        mappings.push(ProfileMapping {
            start: mapping.memory_start,
            limit: mapping.memory_limit,
            file: string(mapping.filename)?,
        });
    }

    let mut function_names = HashMap::new();
    for function in &profile.function {
        function_names.insert(function.id, string(function.name)?);
    }

    let mut location_index = HashMap::new();
    let mut locations = Vec::with_capacity(profile.location.len());
    for location in &profile.location {
        let mapping = match location.mapping_id {
            0 => None,
            id => Some(*mapping_index.get(&id).ok_or_else(|| {
                PipelineError::Parse(format!("location {} has unknown mapping {id}", location.id))
            })?),
        };
        let functions = location
            .line
            .iter()
            .map(|line| {
                function_names.get(&line.function_id).cloned().ok_or_else(|| {
                    PipelineError::Parse(format!(
                        "location {} has unknown function {}",
                        location.id, line.function_id
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        location_index.insert(location.id, locations.len());
        locations.push(ProfileLocation { address: location.address, mapping, functions });
    }

    let mut samples = Vec::with_capacity(profile.sample.len());
    for sample in &profile.sample {
        if sample.value.len() != sample_types.len() {
            return Err(PipelineError::Parse(format!(
                "mismatch: sample has {} values vs. {} types",
                sample.value.len(),
                sample_types.len()
            )));
        }
        let stack = sample
            .location_id
            .iter()
            .map(|id| {
                location_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| PipelineError::Parse(format!("unknown location id {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        samples.push(ProfileSample { stack, values: sample.value.clone() });
    }

    Ok(ParsedProfile {
        sample_types,
        period_type,
        period: profile.period,
        duration: Duration::from_nanos(u64::try_from(profile.duration_nanos).unwrap_or(0)),
        mappings,
        locations,
        samples,
    })
}
