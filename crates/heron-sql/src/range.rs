//! Value and index ranges with the planner cost model.
//!
//! A range describes one contiguous slice of an ordered store. The
//! planner builds ranges out of WHERE conjuncts, compares access paths
//! with [`ValueRanges::cost`]/[`IndexRanges::cost`], and the scan
//! operators test encoded keys with `is_in_range`.

use heron_types::{key, Value};

use heron_core::{Error, Result};

/// A range over encoded primary-key values.
///
/// `exclusive` excludes both boundaries; `exact` matches only keys equal
/// to `min`. Setting both is a programming error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueRange {
    /// Lower bound, inclusive unless `exclusive`.
    pub min: Option<Value>,
    /// Upper bound, inclusive unless `exclusive`. Ignored when `exact`.
    pub max: Option<Value>,
    /// Excludes both boundaries from the results.
    pub exclusive: bool,
    /// Matches an exact value equal to `min`.
    pub exact: bool,

    encoded_min: Option<Vec<u8>>,
    encoded_max: Option<Vec<u8>>,
}

impl ValueRange {
    /// A range matching exactly `v`.
    pub fn exact(v: Value) -> Self {
        ValueRange {
            min: Some(v),
            exact: true,
            ..Default::default()
        }
    }

    /// A lower-bounded range.
    pub fn greater(v: Value, exclusive: bool) -> Self {
        ValueRange {
            min: Some(v),
            exclusive,
            ..Default::default()
        }
    }

    /// An upper-bounded range.
    pub fn less(v: Value, exclusive: bool) -> Self {
        ValueRange {
            max: Some(v),
            exclusive,
            ..Default::default()
        }
    }

    /// Encodes the boundaries with the given key encoder.
    pub fn encode(&mut self, mut enc: impl FnMut(&Value) -> Result<Vec<u8>>) -> Result<()> {
        assert!(
            !(self.exclusive && self.exact),
            "exclusive and exact cannot both be true"
        );
        self.encoded_min = self.min.as_ref().map(&mut enc).transpose()?;
        self.encoded_max = self.max.as_ref().map(&mut enc).transpose()?;
        Ok(())
    }

    /// Returns the encoded lower bound, when one is set.
    pub fn encoded_min(&self) -> Option<&[u8]> {
        self.encoded_min.as_deref()
    }

    /// Returns the encoded upper bound, when one is set.
    pub fn encoded_max(&self) -> Option<&[u8]> {
        self.encoded_max.as_deref()
    }

    /// Returns true if the encoded key falls inside the range.
    pub fn is_in_range(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return self.encoded_min.as_deref() == Some(encoded);
        }

        if let Some(min) = &self.encoded_min {
            match encoded.cmp(min.as_slice()) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Equal if self.exclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.encoded_max {
            match encoded.cmp(max.as_slice()) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if self.exclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Returns true once an ascending scan has moved past the range.
    pub fn past_upper(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return self.encoded_min.as_deref() != Some(encoded);
        }
        match &self.encoded_max {
            Some(max) => encoded > max.as_slice(),
            None => false,
        }
    }

    /// Returns true once a descending scan has moved past the range.
    pub fn past_lower(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return self.encoded_min.as_deref() != Some(encoded);
        }
        match &self.encoded_min {
            Some(min) => encoded < min.as_slice(),
            None => false,
        }
    }

    fn cost(&self) -> usize {
        range_cost(self.exact, self.min.is_some(), self.max.is_some())
    }
}

/// A list of primary-key ranges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueRanges(pub Vec<ValueRange>);

impl ValueRanges {
    /// Appends a range, dropping duplicates.
    pub fn append(&mut self, rng: ValueRange) {
        if !self.0.contains(&rng) {
            self.0.push(rng);
        }
    }

    /// Encodes every range.
    pub fn encode(&mut self, mut enc: impl FnMut(&Value) -> Result<Vec<u8>>) -> Result<()> {
        for rng in &mut self.0 {
            rng.encode(&mut enc)?;
        }
        Ok(())
    }

    /// The planner's heuristic cost of scanning these ranges: exact
    /// matches cost 1, two-sided ranges 50, one-sided 100 and open
    /// ranges 200.
    pub fn cost(&self) -> usize {
        self.0.iter().map(ValueRange::cost).sum()
    }
}

/// A range over encoded index tuples.
///
/// `arity` is the number of columns the range constrains;
/// `index_arity_max` is the arity of the index it will run against.
/// When the range constrains fewer columns than the index has, bounds
/// compare against the matching prefix of each tuple.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRange {
    /// Lower-bound tuple, inclusive unless `exclusive`.
    pub min: Vec<Value>,
    /// Upper-bound tuple, inclusive unless `exclusive`. Ignored when
    /// `exact`.
    pub max: Vec<Value>,
    /// Excludes both boundaries from the results.
    pub exclusive: bool,
    /// Matches tuples equal to `min`.
    pub exact: bool,
    /// Number of columns this range constrains.
    pub arity: usize,
    /// Arity of the target index.
    pub index_arity_max: usize,

    encoded_min: Option<Vec<u8>>,
    encoded_max: Option<Vec<u8>>,
}

impl IndexRange {
    /// A range matching exactly the tuple `values`.
    pub fn exact(values: Vec<Value>) -> Self {
        IndexRange {
            arity: values.len(),
            min: values,
            exact: true,
            ..Default::default()
        }
    }

    /// A lower-bounded range.
    pub fn greater(values: Vec<Value>, exclusive: bool) -> Self {
        IndexRange {
            arity: values.len(),
            min: values,
            exclusive,
            ..Default::default()
        }
    }

    /// An upper-bounded range.
    pub fn less(values: Vec<Value>, exclusive: bool) -> Self {
        IndexRange {
            arity: values.len(),
            max: values,
            exclusive,
            ..Default::default()
        }
    }

    /// Encodes the boundary tuples.
    pub fn encode(&mut self) -> Result<()> {
        assert!(
            !(self.exclusive && self.exact),
            "exclusive and exact cannot both be true"
        );
        self.encoded_min = if self.min.is_empty() {
            None
        } else {
            Some(key::encode_tuple(&self.min).map_err(Error::from)?)
        };
        self.encoded_max = if self.max.is_empty() {
            None
        } else {
            Some(key::encode_tuple(&self.max).map_err(Error::from)?)
        };
        Ok(())
    }

    /// Returns the lower-bound tuple values.
    pub fn min_values(&self) -> &[Value] {
        &self.min
    }

    /// Returns the upper-bound tuple values.
    pub fn max_values(&self) -> &[Value] {
        &self.max
    }

    /// The first boundary value, used to derive a typed seek pivot.
    pub fn pivot_value(&self) -> Option<&Value> {
        self.min.first().or_else(|| self.max.first())
    }

    fn clamp<'a>(&self, encoded: &'a [u8], bound: &[u8]) -> &'a [u8] {
        // a partial range compares against the tuple prefix of matching
        // width
        if self.arity < self.index_arity_max && encoded.len() > bound.len() {
            &encoded[..bound.len()]
        } else {
            encoded
        }
    }

    /// Returns true if the encoded tuple falls inside the range.
    pub fn is_in_range(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return match &self.encoded_min {
                Some(min) => self.clamp(encoded, min) == min.as_slice(),
                None => false,
            };
        }

        if let Some(min) = &self.encoded_min {
            match self.clamp(encoded, min).cmp(min.as_slice()) {
                std::cmp::Ordering::Less => return false,
                std::cmp::Ordering::Equal if self.exclusive => return false,
                _ => {}
            }
        }
        if let Some(max) = &self.encoded_max {
            match self.clamp(encoded, max).cmp(max.as_slice()) {
                std::cmp::Ordering::Greater => return false,
                std::cmp::Ordering::Equal if self.exclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Returns true once an ascending scan has moved past the range.
    pub fn past_upper(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return match &self.encoded_min {
                Some(min) => self.clamp(encoded, min) != min.as_slice(),
                None => true,
            };
        }
        match &self.encoded_max {
            Some(max) => self.clamp(encoded, max) > max.as_slice(),
            None => false,
        }
    }

    /// Returns true once a descending scan has moved past the range.
    pub fn past_lower(&self, encoded: &[u8]) -> bool {
        if self.exact {
            return match &self.encoded_min {
                Some(min) => self.clamp(encoded, min) != min.as_slice(),
                None => true,
            };
        }
        match &self.encoded_min {
            Some(min) => self.clamp(encoded, min) < min.as_slice(),
            None => false,
        }
    }

    fn cost(&self) -> usize {
        range_cost(self.exact, !self.min.is_empty(), !self.max.is_empty())
    }
}

/// A list of index ranges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRanges(pub Vec<IndexRange>);

impl IndexRanges {
    /// Appends a range, dropping duplicates.
    pub fn append(&mut self, rng: IndexRange) {
        if !self.0.contains(&rng) {
            self.0.push(rng);
        }
    }

    /// Encodes every range.
    pub fn encode(&mut self) -> Result<()> {
        for rng in &mut self.0 {
            rng.encode()?;
        }
        Ok(())
    }

    /// The planner's heuristic cost of scanning these ranges.
    pub fn cost(&self) -> usize {
        self.0.iter().map(IndexRange::cost).sum()
    }
}

fn range_cost(exact: bool, has_min: bool, has_max: bool) -> usize {
    if exact {
        1
    } else if has_min && has_max {
        50
    } else if has_min || has_max {
        100
    } else {
        200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(r: &mut ValueRange) {
        r.encode(|v| Ok(key::encode_key(v)?)).unwrap();
    }

    #[test]
    fn test_cost_is_monotone() {
        let exact = ValueRange::exact(Value::Integer(1));
        let mut two_sided = ValueRange::greater(Value::Integer(1), false);
        two_sided.max = Some(Value::Integer(5));
        let one_sided = ValueRange::less(Value::Integer(5), false);
        let open = ValueRange::default();

        let costs: Vec<usize> = [exact, two_sided, one_sided, open]
            .into_iter()
            .map(|r| ValueRanges(vec![r]).cost())
            .collect();
        assert_eq!(costs, vec![1, 50, 100, 200]);
        assert!(costs.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exact_range_matches_only_min() {
        let mut r = ValueRange::exact(Value::Integer(5));
        encoded(&mut r);

        let five = key::encode_key(&Value::Integer(5)).unwrap();
        let six = key::encode_key(&Value::Integer(6)).unwrap();
        assert!(r.is_in_range(&five));
        assert!(!r.is_in_range(&six));
        assert!(r.past_upper(&six));
    }

    #[test]
    fn test_two_sided_range_boundaries() {
        let mut r = ValueRange::greater(Value::Integer(1), false);
        r.max = Some(Value::Integer(3));
        encoded(&mut r);

        let enc = |i| key::encode_key(&Value::Integer(i)).unwrap();
        assert!(!r.is_in_range(&enc(0)));
        assert!(r.is_in_range(&enc(1)));
        assert!(r.is_in_range(&enc(3)));
        assert!(!r.is_in_range(&enc(4)));

        let mut excl = r.clone();
        excl.exclusive = true;
        encoded(&mut excl);
        assert!(!excl.is_in_range(&enc(1)));
        assert!(excl.is_in_range(&enc(2)));
        assert!(!excl.is_in_range(&enc(3)));
    }

    #[test]
    #[should_panic(expected = "exclusive and exact")]
    fn test_exclusive_and_exact_panics() {
        let mut r = ValueRange::exact(Value::Integer(1));
        r.exclusive = true;
        encoded(&mut r);
    }

    #[test]
    fn test_ranges_append_dedupes() {
        let mut ranges = ValueRanges::default();
        ranges.append(ValueRange::exact(Value::Integer(1)));
        ranges.append(ValueRange::exact(Value::Integer(1)));
        ranges.append(ValueRange::exact(Value::Integer(2)));
        assert_eq!(ranges.0.len(), 2);
    }

    #[test]
    fn test_index_range_partial_arity_prefix_match() {
        // index on (a, b), range bounds a only
        let mut r = IndexRange::exact(vec![Value::Integer(1)]);
        r.index_arity_max = 2;
        r.encode().unwrap();

        let matching = key::encode_tuple(&[Value::Integer(1), Value::text("x")]).unwrap();
        let other = key::encode_tuple(&[Value::Integer(2), Value::text("x")]).unwrap();
        assert!(r.is_in_range(&matching));
        assert!(!r.is_in_range(&other));
        assert!(r.past_upper(&other));
    }

    #[test]
    fn test_index_range_full_tuple() {
        let mut r = IndexRange::greater(vec![Value::Integer(1)], true);
        r.index_arity_max = 1;
        r.encode().unwrap();

        let one = key::encode_tuple(&[Value::Integer(1)]).unwrap();
        let two = key::encode_tuple(&[Value::Integer(2)]).unwrap();
        assert!(!r.is_in_range(&one));
        assert!(r.is_in_range(&two));
    }

    #[test]
    fn test_index_ranges_cost() {
        let mut ranges = IndexRanges::default();
        ranges.append(IndexRange::exact(vec![Value::Integer(1)]));
        ranges.append(IndexRange::less(vec![Value::Integer(9)], false));
        assert_eq!(ranges.cost(), 101);
    }
}
