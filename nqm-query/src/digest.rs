//! Stable SHA-256 digests of time filters and compound queries.
//!
//! The byte layout is a persisted contract with the result cache:
//!
//! ```text
//! str   := u32 BE byte length, UTF-8 bytes
//! strs  := u32 BE count, str*
//! ints  := u32 BE count, i64 BE*
//! time  := 0x00                                  unset
//!        | 0x01 i64 BE start, i64 BE end        absolute, epoch seconds
//!        | 0x02 str(unit code), u32 BE value    relative
//! query := "nqm.compound-query.v1"
//!          0x10 time
//!          0x20 agent: strs(name, hostname, ip_address, connection_id)
//!                      ints(isp, province, city, name_tag, group_tag)
//!          0x30 target: strs(name, host)
//!                       ints(isp, province, city, name_tag, group_tag)
//!          0x40 str(metrics expression)
//!          0x50 strs(grouping.agent) strs(grouping.target)
//!          0x60 strs(output.metrics)
//! ```
//!
//! A time filter on its own hashes `"nqm.time-filter.v1"` followed by `time`.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::model::{AgentFilter, CompoundQuery, TargetFilter, TimeFilter};

const QUERY_DOMAIN: &[u8] = b"nqm.compound-query.v1";
const TIME_FILTER_DOMAIN: &[u8] = b"nqm.time-filter.v1";

const TIME_UNSET: u8 = 0x00;
const TIME_ABSOLUTE: u8 = 0x01;
const TIME_RELATIVE: u8 = 0x02;

const SECTION_TIME: u8 = 0x10;
const SECTION_AGENT: u8 = 0x20;
const SECTION_TARGET: u8 = 0x30;
const SECTION_METRICS: u8 = 0x40;
const SECTION_GROUPING: u8 = 0x50;
const SECTION_OUTPUT: u8 = 0x60;

/// Fixed-width digest used as cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryDigest([u8; 32]);

impl QueryDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for QueryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for QueryDigest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct DigestWriter {
    hasher: Sha256,
}

impl DigestWriter {
    fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    fn tag(&mut self, tag: u8) {
        self.hasher.update([tag]);
    }

    fn length(&mut self, length: usize) {
        let length = u32::try_from(length).unwrap_or(u32::MAX);
        self.hasher.update(length.to_be_bytes());
    }

    fn str(&mut self, value: &str) {
        self.length(value.len());
        self.hasher.update(value.as_bytes());
    }

    fn strs(&mut self, values: &[String]) {
        self.length(values.len());
        for value in values {
            self.str(value);
        }
    }

    fn ints<T: Copy + Into<i64>>(&mut self, values: &[T]) {
        self.length(values.len());
        for value in values {
            self.hasher.update((*value).into().to_be_bytes());
        }
    }

    fn time(&mut self, filter: &TimeFilter) {
        match filter {
            TimeFilter::Unset => self.tag(TIME_UNSET),
            TimeFilter::Absolute { start, end } => {
                self.tag(TIME_ABSOLUTE);
                self.hasher.update(start.timestamp().to_be_bytes());
                self.hasher.update(end.timestamp().to_be_bytes());
            }
            TimeFilter::Relative(spec) => {
                self.tag(TIME_RELATIVE);
                self.str(spec.unit.code());
                self.hasher.update(spec.value.to_be_bytes());
            }
        }
    }

    fn agent(&mut self, agent: &AgentFilter) {
        self.strs(&agent.name);
        self.strs(&agent.hostname);
        self.strs(&agent.ip_address);
        self.strs(&agent.connection_id);
        self.ints(&agent.isp_ids);
        self.ints(&agent.province_ids);
        self.ints(&agent.city_ids);
        self.ints(&agent.name_tag_ids);
        self.ints(&agent.group_tag_ids);
    }

    fn target(&mut self, target: &TargetFilter) {
        self.strs(&target.name);
        self.strs(&target.host);
        self.ints(&target.isp_ids);
        self.ints(&target.province_ids);
        self.ints(&target.city_ids);
        self.ints(&target.name_tag_ids);
        self.ints(&target.group_tag_ids);
    }

    fn finish(self) -> QueryDigest {
        QueryDigest(self.hasher.finalize().into())
    }
}

impl TimeFilter {
    /// Digest over the fields of the active variant only.
    pub fn digest(&self) -> QueryDigest {
        let mut writer = DigestWriter::new(TIME_FILTER_DOMAIN);
        writer.time(self);
        writer.finish()
    }
}

impl CompoundQuery {
    /// Digest of the canonical form of the query.
    ///
    /// The query is hashed as it is; call `setup_default` first so that an
    /// omitted section and its default hash alike.
    pub fn digest(&self) -> QueryDigest {
        let query = self.canonicalized();
        let mut writer = DigestWriter::new(QUERY_DOMAIN);

        writer.tag(SECTION_TIME);
        writer.time(&query.filters.time);
        writer.tag(SECTION_AGENT);
        writer.agent(&query.filters.agent);
        writer.tag(SECTION_TARGET);
        writer.target(&query.filters.target);
        writer.tag(SECTION_METRICS);
        writer.str(&query.filters.metrics);
        writer.tag(SECTION_GROUPING);
        writer.strs(&query.grouping.agent);
        writer.strs(&query.grouping.target);
        writer.tag(SECTION_OUTPUT);
        writer.strs(&query.output.metrics);

        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TimeUnit, TimeWithUnit};
    use chrono::{TimeZone, Utc};

    fn sample() -> CompoundQuery {
        let mut query = CompoundQuery::new();
        query.filters.time = TimeFilter::absolute(
            Utc.timestamp_opt(12890090, 0).unwrap(),
            Utc.timestamp_opt(12930090, 0).unwrap(),
        );
        query.filters.agent.city_ids = vec![18, 92, 154];
        query.filters.target.isp_ids = vec![8, 103, 192];
        query.grouping.agent = vec!["ip_address".into()];
        query.grouping.target = vec!["city".into()];
        query.output.metrics = vec!["max".into(), "loss".into(), "num_agent".into()];
        query
    }

    #[test]
    fn digest_is_stable_and_hex_rendered() {
        let digest = sample().digest();
        assert_eq!(digest, sample().digest());
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest.to_string(), digest.to_hex());
        assert!(digest
            .to_hex()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut shuffled = sample();
        shuffled.filters.agent.city_ids = vec![154, 18, 92, 18];
        shuffled.filters.target.isp_ids = vec![192, 8, 103];
        assert_eq!(shuffled.digest(), sample().digest());

        let from_json = CompoundQuery::from_json_str(
            r#"{
                "output": { "metrics": ["max", "loss", "num_agent"] },
                "grouping": { "target": ["city"], "agent": ["ip_address"] },
                "filters": {
                    "target": { "isp_ids": [192, 103, 8] },
                    "agent": { "city_ids": [92, 154, 18] },
                    "time": { "end_time": 12930090, "start_time": 12890090 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(from_json.digest(), sample().digest());
    }

    #[test]
    fn every_section_changes_the_digest() {
        let base = sample().digest();
        let mut variants = Vec::new();

        let mut query = sample();
        query.filters.agent.city_ids.push(200);
        variants.push(query);

        let mut query = sample();
        query.filters.target.name.push("t1".into());
        variants.push(query);

        let mut query = sample();
        query.filters.metrics = "$max > 1".into();
        variants.push(query);

        let mut query = sample();
        query.grouping.target.clear();
        variants.push(query);

        let mut query = sample();
        query.output.metrics.reverse();
        variants.push(query);

        let mut query = sample();
        query.filters.time = TimeFilter::relative(TimeUnit::Hour, 3);
        variants.push(query);

        let mut digests: Vec<QueryDigest> = variants.iter().map(CompoundQuery::digest).collect();
        assert!(digests.iter().all(|digest| *digest != base));
        digests.sort();
        digests.dedup();
        assert_eq!(digests.len(), variants.len());
    }

    #[test]
    fn moving_a_value_between_fields_changes_the_digest() {
        let mut as_name = CompoundQuery::new();
        as_name.filters.agent.name = vec!["a1".into()];
        let mut as_hostname = CompoundQuery::new();
        as_hostname.filters.agent.hostname = vec!["a1".into()];

        assert_ne!(as_name.digest(), as_hostname.digest());
    }

    #[test]
    fn time_digest_depends_on_active_variant_only() {
        let absolute = TimeFilter::absolute(
            Utc.timestamp_opt(789907610, 0).unwrap(),
            Utc.timestamp_opt(789937610, 0).unwrap(),
        );
        let relative = TimeFilter::Relative(TimeWithUnit::new(TimeUnit::Year, 3));

        assert_eq!(absolute.digest(), absolute.digest());
        assert_ne!(absolute.digest(), relative.digest());
        assert_ne!(
            relative.digest(),
            TimeFilter::relative(TimeUnit::Year, 4).digest()
        );
        assert_ne!(TimeFilter::Unset.digest(), relative.digest());
        assert_eq!(TimeFilter::Unset.digest(), TimeFilter::default().digest());
    }
}
