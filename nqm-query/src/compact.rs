//! URL-safe compact form of a compound query.
//!
//! The payload is base64url (no padding) over a versioned binary layout:
//!
//! ```text
//! version  u8 = 1
//! flags    u8        0x01 time, 0x02 agent, 0x04 target, 0x08 metrics,
//!                    0x10 grouping.agent, 0x20 grouping.target, 0x40 output
//! time     u8 tag    1: zigzag start, zigzag end (epoch seconds)
//!                    2: u8 unit index, varint value
//! agent    u16 LE field mask, then each present field in order
//! target   u16 LE field mask, then each present field in order
//! metrics  string
//! grouping varint count, u8 dimension index*
//! output   varint count, string*
//!
//! string   varint byte length, UTF-8 bytes
//! strings  varint count, string*
//! ids      varint count, zigzag first, varint delta* (every delta >= 1)
//! ```
//!
//! Varints are LEB128. Sections absent from `flags` decode to their empty
//! value, after which the defaults are applied.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::defaults::QueryDefaults;
use crate::error::QueryError;
use crate::model::{
    AgentFilter, CompoundQuery, TargetFilter, TimeFilter, TimeUnit, TimeWithUnit,
    AGENT_GROUPING_DOMAIN, TARGET_GROUPING_DOMAIN,
};

/// Version byte leading every compact payload.
pub const COMPACT_VERSION: u8 = 1;

const FLAG_TIME: u8 = 0x01;
const FLAG_AGENT: u8 = 0x02;
const FLAG_TARGET: u8 = 0x04;
const FLAG_METRICS: u8 = 0x08;
const FLAG_GROUPING_AGENT: u8 = 0x10;
const FLAG_GROUPING_TARGET: u8 = 0x20;
const FLAG_OUTPUT: u8 = 0x40;
const KNOWN_FLAGS: u8 = 0x7F;

const TIME_ABSOLUTE: u8 = 1;
const TIME_RELATIVE: u8 = 2;

const AGENT_FIELDS: u16 = 9;
const TARGET_FIELDS: u16 = 7;

/// Compact form of `query` with the built-in defaults filled in.
pub fn compress(query: &CompoundQuery) -> String {
    compress_with(query, &QueryDefaults::default())
}

/// Compact form of the canonical, defaulted `query`.
///
/// Equal queries always produce the same string.
pub fn compress_with(query: &CompoundQuery, defaults: &QueryDefaults) -> String {
    let query = query.canonicalized().with_defaults(defaults);
    let mut writer = CompactWriter::default();
    writer.query(&query);

    let encoded = URL_SAFE_NO_PAD.encode(&writer.buf);
    debug!(bytes = writer.buf.len(), chars = encoded.len(), "compressed compound query");
    encoded
}

/// Rebuilds a query from [`compress`] output, applying the built-in defaults.
pub fn decompress(encoded: &str) -> Result<CompoundQuery, QueryError> {
    decompress_with(encoded, &QueryDefaults::default())
}

/// Rebuilds a query from compact form; any malformed input is rejected whole.
pub fn decompress_with(
    encoded: &str,
    defaults: &QueryDefaults,
) -> Result<CompoundQuery, QueryError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim())
        .map_err(|err| QueryError::compact(format!("not base64url: {}", err)))?;

    let mut reader = CompactReader::new(&bytes);
    let mut query = reader.query()?;
    reader.finish()?;

    query.canonicalize();
    query.setup_default_with(defaults);
    Ok(query)
}

impl CompoundQuery {
    /// See [`compress`].
    pub fn to_compact(&self) -> String {
        compress(self)
    }

    /// See [`decompress`].
    pub fn from_compact(encoded: &str) -> Result<Self, QueryError> {
        decompress(encoded)
    }
}

fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[derive(Default)]
struct CompactWriter {
    buf: Vec<u8>,
}

impl CompactWriter {
    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn varint(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    fn string(&mut self, value: &str) {
        self.varint(value.len() as u64);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn strings(&mut self, values: &[String]) {
        self.varint(values.len() as u64);
        for value in values {
            self.string(value);
        }
    }

    /// `values` must be sorted and free of duplicates.
    fn ids<T: Copy + Into<i64>>(&mut self, values: &[T]) {
        self.varint(values.len() as u64);
        let mut previous: Option<i64> = None;
        for value in values {
            let value: i64 = (*value).into();
            match previous {
                None => self.varint(zigzag_encode(value)),
                Some(previous) => self.varint(value.wrapping_sub(previous) as u64),
            }
            previous = Some(value);
        }
    }

    fn dimensions(&mut self, values: &[String], domain: &[&str]) {
        let indexes: Vec<u8> = values
            .iter()
            .filter_map(|value| domain.iter().position(|known| *known == value.as_str()))
            .map(|index| index as u8)
            .collect();
        self.varint(indexes.len() as u64);
        self.buf.extend_from_slice(&indexes);
    }

    fn time(&mut self, filter: &TimeFilter) {
        match filter {
            TimeFilter::Unset => {}
            TimeFilter::Absolute { start, end } => {
                self.u8(TIME_ABSOLUTE);
                self.varint(zigzag_encode(start.timestamp()));
                self.varint(zigzag_encode(end.timestamp()));
            }
            TimeFilter::Relative(spec) => {
                self.u8(TIME_RELATIVE);
                self.u8(spec.unit.index());
                self.varint(u64::from(spec.value));
            }
        }
    }

    fn mask(&mut self, present: &[bool]) {
        let mask = present
            .iter()
            .enumerate()
            .filter(|(_, present)| **present)
            .fold(0u16, |mask, (bit, _)| mask | (1 << bit));
        self.buf.extend_from_slice(&mask.to_le_bytes());
    }

    fn agent(&mut self, agent: &AgentFilter) {
        let strings = [
            &agent.name,
            &agent.hostname,
            &agent.ip_address,
            &agent.connection_id,
        ];
        let small_ids = [
            &agent.isp_ids,
            &agent.province_ids,
            &agent.city_ids,
            &agent.name_tag_ids,
        ];

        let mut present: Vec<bool> = strings.iter().map(|set| !set.is_empty()).collect();
        present.extend(small_ids.iter().map(|set| !set.is_empty()));
        present.push(!agent.group_tag_ids.is_empty());
        self.mask(&present);

        for set in strings.into_iter().filter(|set| !set.is_empty()) {
            self.strings(set);
        }
        for set in small_ids.into_iter().filter(|set| !set.is_empty()) {
            self.ids(set);
        }
        if !agent.group_tag_ids.is_empty() {
            self.ids(&agent.group_tag_ids);
        }
    }

    fn target(&mut self, target: &TargetFilter) {
        let strings = [&target.name, &target.host];
        let small_ids = [
            &target.isp_ids,
            &target.province_ids,
            &target.city_ids,
            &target.name_tag_ids,
        ];

        let mut present: Vec<bool> = strings.iter().map(|set| !set.is_empty()).collect();
        present.extend(small_ids.iter().map(|set| !set.is_empty()));
        present.push(!target.group_tag_ids.is_empty());
        self.mask(&present);

        for set in strings.into_iter().filter(|set| !set.is_empty()) {
            self.strings(set);
        }
        for set in small_ids.into_iter().filter(|set| !set.is_empty()) {
            self.ids(set);
        }
        if !target.group_tag_ids.is_empty() {
            self.ids(&target.group_tag_ids);
        }
    }

    fn query(&mut self, query: &CompoundQuery) {
        let sections = [
            (FLAG_TIME, !query.filters.time.is_unset()),
            (FLAG_AGENT, !query.filters.agent.is_empty()),
            (FLAG_TARGET, !query.filters.target.is_empty()),
            (FLAG_METRICS, !query.filters.metrics.is_empty()),
            (FLAG_GROUPING_AGENT, !query.grouping.agent.is_empty()),
            (FLAG_GROUPING_TARGET, !query.grouping.target.is_empty()),
            (FLAG_OUTPUT, !query.output.metrics.is_empty()),
        ];
        let flags = sections
            .iter()
            .filter(|(_, present)| *present)
            .fold(0u8, |flags, (flag, _)| flags | flag);

        self.u8(COMPACT_VERSION);
        self.u8(flags);

        if flags & FLAG_TIME != 0 {
            self.time(&query.filters.time);
        }
        if flags & FLAG_AGENT != 0 {
            self.agent(&query.filters.agent);
        }
        if flags & FLAG_TARGET != 0 {
            self.target(&query.filters.target);
        }
        if flags & FLAG_METRICS != 0 {
            self.string(&query.filters.metrics);
        }
        if flags & FLAG_GROUPING_AGENT != 0 {
            self.dimensions(&query.grouping.agent, &AGENT_GROUPING_DOMAIN);
        }
        if flags & FLAG_GROUPING_TARGET != 0 {
            self.dimensions(&query.grouping.target, &TARGET_GROUPING_DOMAIN);
        }
        if flags & FLAG_OUTPUT != 0 {
            self.strings(&query.output.metrics);
        }
    }
}

struct CompactReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CompactReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], QueryError> {
        if self.remaining() < len {
            return Err(QueryError::compact(format!("truncated {}", what)));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u8(&mut self, what: &str) -> Result<u8, QueryError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, QueryError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn varint(&mut self, what: &str) -> Result<u64, QueryError> {
        let mut result: u64 = 0;
        let mut shift = 0;

        loop {
            let byte = self.u8(what)?;
            if shift == 63 && byte > 1 {
                return Err(QueryError::compact(format!("varint overflow in {}", what)));
            }
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(QueryError::compact(format!("varint overflow in {}", what)));
            }
        }
    }

    /// Element count, bounded by the bytes left since every element takes at least one.
    fn count(&mut self, what: &str) -> Result<usize, QueryError> {
        let count = self.varint(what)?;
        match usize::try_from(count) {
            Ok(count) if count <= self.remaining() => Ok(count),
            _ => Err(QueryError::compact(format!(
                "{} claims {} elements with {} bytes left",
                what,
                count,
                self.remaining()
            ))),
        }
    }

    fn string(&mut self, what: &str) -> Result<String, QueryError> {
        let len = self.count(what)?;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| QueryError::compact(format!("{} is not UTF-8", what)))
    }

    fn strings(&mut self, what: &str) -> Result<Vec<String>, QueryError> {
        let count = self.count(what)?;
        (0..count).map(|_| self.string(what)).collect()
    }

    fn ids<T: TryFrom<i64>>(&mut self, what: &str) -> Result<Vec<T>, QueryError> {
        let count = self.count(what)?;
        let mut values = Vec::with_capacity(count);
        let mut previous: Option<i64> = None;

        for _ in 0..count {
            let value = match previous {
                None => zigzag_decode(self.varint(what)?),
                Some(previous) => {
                    let delta = self.varint(what)?;
                    if delta == 0 {
                        return Err(QueryError::compact(format!("repeated id in {}", what)));
                    }
                    i64::try_from(delta)
                        .ok()
                        .and_then(|delta| previous.checked_add(delta))
                        .ok_or_else(|| QueryError::compact(format!("id overflow in {}", what)))?
                }
            };
            let id = T::try_from(value)
                .map_err(|_| QueryError::compact(format!("id {} out of range in {}", value, what)))?;
            values.push(id);
            previous = Some(value);
        }

        Ok(values)
    }

    fn dimensions(&mut self, domain: &[&str], what: &str) -> Result<Vec<String>, QueryError> {
        let count = self.count(what)?;
        (0..count)
            .map(|_| {
                let index = self.u8(what)?;
                domain
                    .get(usize::from(index))
                    .map(|dimension| dimension.to_string())
                    .ok_or_else(|| {
                        QueryError::compact(format!("unknown dimension {} in {}", index, what))
                    })
            })
            .collect()
    }

    fn instant(&mut self, what: &str) -> Result<DateTime<Utc>, QueryError> {
        let seconds = zigzag_decode(self.varint(what)?);
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| QueryError::compact(format!("{} out of range: {}", what, seconds)))
    }

    fn time(&mut self) -> Result<TimeFilter, QueryError> {
        match self.u8("time tag")? {
            TIME_ABSOLUTE => {
                let start = self.instant("start time")?;
                let end = self.instant("end time")?;
                Ok(TimeFilter::Absolute { start, end })
            }
            TIME_RELATIVE => {
                let index = self.u8("time unit")?;
                let unit = TimeUnit::from_index(index)
                    .ok_or_else(|| QueryError::compact(format!("unknown time unit {}", index)))?;
                let value = u32::try_from(self.varint("time value")?)
                    .map_err(|_| QueryError::compact("time value exceeds 32 bits"))?;
                Ok(TimeFilter::Relative(TimeWithUnit::new(unit, value)))
            }
            tag => Err(QueryError::compact(format!("unknown time tag {}", tag))),
        }
    }

    fn mask(&mut self, fields: u16, what: &str) -> Result<u16, QueryError> {
        let mask = self.u16(what)?;
        if mask >> fields != 0 {
            return Err(QueryError::compact(format!(
                "unknown fields {:#06x} in {}",
                mask, what
            )));
        }
        Ok(mask)
    }

    fn agent(&mut self) -> Result<AgentFilter, QueryError> {
        let mask = self.mask(AGENT_FIELDS, "agent filter")?;
        let has = |bit: u16| mask & (1 << bit) != 0;
        let mut agent = AgentFilter::default();

        if has(0) {
            agent.name = self.strings("agent name")?;
        }
        if has(1) {
            agent.hostname = self.strings("agent hostname")?;
        }
        if has(2) {
            agent.ip_address = self.strings("agent ip_address")?;
        }
        if has(3) {
            agent.connection_id = self.strings("agent connection_id")?;
        }
        if has(4) {
            agent.isp_ids = self.ids("agent isp_ids")?;
        }
        if has(5) {
            agent.province_ids = self.ids("agent province_ids")?;
        }
        if has(6) {
            agent.city_ids = self.ids("agent city_ids")?;
        }
        if has(7) {
            agent.name_tag_ids = self.ids("agent name_tag_ids")?;
        }
        if has(8) {
            agent.group_tag_ids = self.ids("agent group_tag_ids")?;
        }

        Ok(agent)
    }

    fn target(&mut self) -> Result<TargetFilter, QueryError> {
        let mask = self.mask(TARGET_FIELDS, "target filter")?;
        let has = |bit: u16| mask & (1 << bit) != 0;
        let mut target = TargetFilter::default();

        if has(0) {
            target.name = self.strings("target name")?;
        }
        if has(1) {
            target.host = self.strings("target host")?;
        }
        if has(2) {
            target.isp_ids = self.ids("target isp_ids")?;
        }
        if has(3) {
            target.province_ids = self.ids("target province_ids")?;
        }
        if has(4) {
            target.city_ids = self.ids("target city_ids")?;
        }
        if has(5) {
            target.name_tag_ids = self.ids("target name_tag_ids")?;
        }
        if has(6) {
            target.group_tag_ids = self.ids("target group_tag_ids")?;
        }

        Ok(target)
    }

    fn query(&mut self) -> Result<CompoundQuery, QueryError> {
        let version = self.u8("version")?;
        if version != COMPACT_VERSION {
            return Err(QueryError::compact(format!(
                "unsupported version {}",
                version
            )));
        }
        let flags = self.u8("section flags")?;
        if flags & !KNOWN_FLAGS != 0 {
            return Err(QueryError::compact(format!(
                "unknown section flags {:#04x}",
                flags
            )));
        }

        let mut query = CompoundQuery::new();
        if flags & FLAG_TIME != 0 {
            query.filters.time = self.time()?;
        }
        if flags & FLAG_AGENT != 0 {
            query.filters.agent = self.agent()?;
        }
        if flags & FLAG_TARGET != 0 {
            query.filters.target = self.target()?;
        }
        if flags & FLAG_METRICS != 0 {
            query.filters.metrics = self.string("metrics expression")?;
        }
        if flags & FLAG_GROUPING_AGENT != 0 {
            query.grouping.agent = self.dimensions(&AGENT_GROUPING_DOMAIN, "agent grouping")?;
        }
        if flags & FLAG_GROUPING_TARGET != 0 {
            query.grouping.target = self.dimensions(&TARGET_GROUPING_DOMAIN, "target grouping")?;
        }
        if flags & FLAG_OUTPUT != 0 {
            query.output.metrics = self.strings("output metrics")?;
        }

        Ok(query)
    }

    fn finish(&self) -> Result<(), QueryError> {
        match self.remaining() {
            0 => Ok(()),
            left => Err(QueryError::compact(format!("{} trailing bytes", left))),
        }
    }
}
