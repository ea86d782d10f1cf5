//! Bounding box parsing and filtering.
//!
//! Query boxes are `minx,miny,maxx,maxy` in WGS-84. Documents match when
//! their box intersects the query box. A box whose `minx > maxx` crosses the
//! antimeridian and is split into two sub-queries that are OR-ed.

use crate::error::FrevaRestError;

/// A WGS-84 bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

/// The whole globe; documents without an explicit box carry this one.
pub const GLOBAL_BBOX: BoundingBox = BoundingBox {
    minx: -180.0,
    miny: -90.0,
    maxx: 180.0,
    maxy: 90.0,
};

impl BoundingBox {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Result<Self, FrevaRestError> {
        let bbox = Self {
            minx,
            miny,
            maxx,
            maxy,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Parse `minx,miny,maxx,maxy`.
    pub fn parse(value: &str) -> Result<Self, FrevaRestError> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(FrevaRestError::InvalidInput(format!(
                "bbox must be minx,miny,maxx,maxy; got: {value}"
            )));
        }
        let mut coords = [0.0_f64; 4];
        for (slot, field) in coords.iter_mut().zip(&fields) {
            *slot = field.parse().map_err(|_| {
                FrevaRestError::InvalidInput(format!("bbox coordinate is not a number: {field}"))
            })?;
        }
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }

    fn validate(&self) -> Result<(), FrevaRestError> {
        let lon_ok = (-180.0..=180.0).contains(&self.minx) && (-180.0..=180.0).contains(&self.maxx);
        let lat_ok = (-90.0..=90.0).contains(&self.miny) && (-90.0..=90.0).contains(&self.maxy);
        if !lon_ok || !lat_ok || self.miny > self.maxy {
            return Err(FrevaRestError::InvalidInput(format!(
                "bbox out of range: {},{},{},{}",
                self.minx, self.miny, self.maxx, self.maxy
            )));
        }
        Ok(())
    }

    /// Whether the box crosses the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.minx > self.maxx
    }

    /// The sub-boxes this query decomposes into: the box itself, or its two
    /// halves when it crosses the antimeridian.
    pub fn split(&self) -> Vec<BoundingBox> {
        if self.crosses_antimeridian() {
            vec![
                BoundingBox {
                    minx: self.minx,
                    miny: self.miny,
                    maxx: 180.0,
                    maxy: self.maxy,
                },
                BoundingBox {
                    minx: -180.0,
                    miny: self.miny,
                    maxx: self.maxx,
                    maxy: self.maxy,
                },
            ]
        } else {
            vec![*self]
        }
    }

    /// Whether two boxes intersect on the sphere.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        for a in self.split() {
            for b in other.split() {
                let lon = a.minx <= b.maxx && b.minx <= a.maxx;
                let lat = a.miny <= b.maxy && b.miny <= a.maxy;
                if lon && lat {
                    return true;
                }
            }
        }
        false
    }

    fn envelope(&self) -> String {
        format!(
            "Intersects(ENVELOPE({},{},{},{}))",
            self.minx, self.maxx, self.maxy, self.miny
        )
    }

    /// Render the box as a filter on the index's `bbox` spatial field.
    pub fn to_filter(&self) -> String {
        let envelopes: Vec<String> = self.split().iter().map(BoundingBox::envelope).collect();
        if envelopes.len() == 1 {
            format!("{{!field f=bbox}}{}", envelopes[0])
        } else {
            format!(
                "{{!field f=bbox}}{} OR {{!field f=bbox}}{}",
                envelopes[0], envelopes[1]
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let bbox = BoundingBox::parse("-10, -20, 30, 40").unwrap();
        assert_eq!(
            bbox.to_filter(),
            "{!field f=bbox}Intersects(ENVELOPE(-10,30,40,-20))"
        );
    }

    #[test]
    fn antimeridian_box_is_split() {
        let bbox = BoundingBox::parse("170,-10,-170,10").unwrap();
        assert!(bbox.crosses_antimeridian());
        assert_eq!(
            bbox.to_filter(),
            "{!field f=bbox}Intersects(ENVELOPE(170,180,10,-10)) \
             OR {!field f=bbox}Intersects(ENVELOPE(-180,-170,10,-10))"
        );
    }

    #[test]
    fn intersection_over_the_antimeridian() {
        let query = BoundingBox::new(170.0, -10.0, -170.0, 10.0).unwrap();
        let east = BoundingBox::new(175.0, -5.0, 179.0, 5.0).unwrap();
        let west = BoundingBox::new(-179.0, -5.0, -175.0, 5.0).unwrap();
        let far = BoundingBox::new(0.0, -5.0, 10.0, 5.0).unwrap();
        assert!(query.intersects(&east));
        assert!(query.intersects(&west));
        assert!(!query.intersects(&far));
        assert!(query.intersects(&GLOBAL_BBOX));
    }

    #[test]
    fn invalid_boxes_are_rejected() {
        assert!(BoundingBox::parse("1,2,3").is_err());
        assert!(BoundingBox::parse("x,2,3,4").is_err());
        assert!(BoundingBox::parse("0,-91,10,10").is_err());
        assert!(BoundingBox::parse("0,10,10,-10").is_err());
        assert!(BoundingBox::parse("-190,0,10,10").is_err());
    }
}
