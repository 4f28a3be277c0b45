/// How a record is aggregated on the sink side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotonic count over the window since the previous flush.
    Sum,
    /// Instantaneous or averaged value.
    Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Float(v) => v as i64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<usize> for MetricValue {
    fn from(v: usize) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One metric ready for serialization. Not modified after it lands in a builder.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub name: String,
    pub value: MetricValue,
    pub kind: MetricKind,
    pub unit: String,
    /// Ordered; `source` is always first.
    pub attributes: Vec<(String, String)>,
}

impl MetricRecord {
    /// Value of the first attribute named `key`.
    #[cfg(test)]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Append-only buffer for one flush cycle.
///
/// Every record gets the builder's `source` label as its first attribute.
#[derive(Debug)]
pub struct MetricBuilder {
    source: String,
    records: Vec<MetricRecord>,
}

impl MetricBuilder {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            records: Vec::with_capacity(16),
        }
    }

    pub fn add(
        &mut self,
        name: &str,
        value: impl Into<MetricValue>,
        kind: MetricKind,
        unit: &str,
        attributes: &[(&str, &str)],
    ) {
        let mut attrs = Vec::with_capacity(attributes.len() + 1);
        attrs.push(("source".to_owned(), self.source.clone()));
        attrs.extend(
            attributes
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned())),
        );

        self.records.push(MetricRecord {
            name: name.to_owned(),
            value: value.into(),
            kind,
            unit: unit.to_owned(),
            attributes: attrs,
        });
    }

    pub fn sum(&mut self, name: &str, value: impl Into<MetricValue>, unit: &str, attributes: &[(&str, &str)]) {
        self.add(name, value, MetricKind::Sum, unit, attributes);
    }

    pub fn gauge(&mut self, name: &str, value: impl Into<MetricValue>, unit: &str, attributes: &[(&str, &str)]) {
        self.add(name, value, MetricKind::Gauge, unit, attributes);
    }

    #[cfg(test)]
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<MetricRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_attribute_comes_first() {
        let mut buf = MetricBuilder::new("pizza-test");
        buf.sum("http_requests_total", 3u64, "requests", &[("method", "GET")]);

        let rec = &buf.records()[0];
        assert_eq!(rec.attributes[0], ("source".into(), "pizza-test".into()));
        assert_eq!(rec.attributes[1], ("method".into(), "GET".into()));
        assert_eq!(rec.attribute("method"), Some("GET"));
        assert_eq!(rec.value, MetricValue::Int(3));
        assert_eq!(rec.kind, MetricKind::Sum);
    }

    #[test]
    fn records_keep_insertion_order() {
        let mut buf = MetricBuilder::new("s");
        buf.gauge("cpu_usage", 12.5, "percentage", &[]);
        buf.gauge("memory_usage", 40.0, "percentage", &[]);
        buf.sum("auth_attempts", 0u64, "attempts", &[("status", "failure")]);

        let names: Vec<_> = buf.records().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["cpu_usage", "memory_usage", "auth_attempts"]);
        assert_eq!(buf.into_records().len(), 3);
    }

    #[test]
    fn value_conversions() {
        assert_eq!(MetricValue::from(u64::MAX), MetricValue::Int(i64::MAX));
        assert_eq!(MetricValue::Int(7).as_f64(), 7.0);
        assert_eq!(MetricValue::Float(5.9).as_i64(), 5);
    }
}
