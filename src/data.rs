use serde::{Deserialize, Serialize};

use crate::db::{Attributes, Key};

/// Collection holding every restaurant record.
pub const COLLECTION: &str = "restaurants";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    Name,
    Address,
    Description,
    Hours,
    AverageRating,
}

/// Logical type of a field. The backend only ever sees text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub field: Field,
    pub attribute: &'static str,
    pub kind: FieldKind,
}

const ID: FieldMapping = FieldMapping {
    field: Field::Id,
    attribute: "id",
    kind: FieldKind::Integer,
};
const NAME: FieldMapping = FieldMapping {
    field: Field::Name,
    attribute: "name",
    kind: FieldKind::Text,
};
const ADDRESS: FieldMapping = FieldMapping {
    field: Field::Address,
    attribute: "address",
    kind: FieldKind::Text,
};
const DESCRIPTION: FieldMapping = FieldMapping {
    field: Field::Description,
    attribute: "description",
    kind: FieldKind::Text,
};
const HOURS: FieldMapping = FieldMapping {
    field: Field::Hours,
    attribute: "hours",
    kind: FieldKind::Text,
};
const AVERAGE_RATING: FieldMapping = FieldMapping {
    field: Field::AverageRating,
    attribute: "averagerating",
    kind: FieldKind::Float,
};

/// Field to backend attribute table. The first entry is the key.
pub const FIELD_MAPPINGS: [FieldMapping; 6] = [ID, NAME, ADDRESS, DESCRIPTION, HOURS, AVERAGE_RATING];

pub const KEY_MAPPING: FieldMapping = ID;

impl Field {
    pub const fn mapping(self) -> &'static FieldMapping {
        match self {
            Self::Id => &ID,
            Self::Name => &NAME,
            Self::Address => &ADDRESS,
            Self::Description => &DESCRIPTION,
            Self::Hours => &HOURS,
            Self::AverageRating => &AVERAGE_RATING,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AttributeError {
    #[error("stored restaurant has no attribute `{attribute}`")]
    Missing { attribute: &'static str },
    #[error("attribute `{attribute}` holds `{value}`, which is not a valid {kind}")]
    Malformed {
        attribute: &'static str,
        kind: FieldKind,
        value: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    #[serde(alias = "Id")]
    pub id: i32,
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Address")]
    pub address: String,
    #[serde(alias = "Description")]
    pub description: String,
    #[serde(alias = "Hours")]
    pub hours: String,
    #[serde(alias = "AverageRating")]
    pub average_rating: f64,
}

impl Restaurant {
    fn encode(&self, field: Field) -> String {
        match field {
            Field::Id => self.id.to_string(),
            Field::Name => self.name.clone(),
            Field::Address => self.address.clone(),
            Field::Description => self.description.clone(),
            Field::Hours => self.hours.clone(),
            Field::AverageRating => self.average_rating.to_string(),
        }
    }

    /// Backend key of this record, the id rendered as text.
    pub fn key(&self) -> Key {
        Key::new(KEY_MAPPING.attribute, self.encode(KEY_MAPPING.field))
    }

    /// Every field, key included, as backend attributes.
    pub fn to_attributes(&self) -> Attributes {
        FIELD_MAPPINGS
            .iter()
            .map(|m| (m.attribute.to_string(), self.encode(m.field)))
            .collect()
    }

    /// The non-key fields, which is what an update overwrites.
    pub fn value_attributes(&self) -> Attributes {
        FIELD_MAPPINGS
            .iter()
            .skip(1)
            .map(|m| (m.attribute.to_string(), self.encode(m.field)))
            .collect()
    }

    fn decode(&mut self, mapping: &FieldMapping, attrs: &Attributes) -> Result<(), AttributeError> {
        match mapping.field {
            Field::Id => self.id = number(attrs, mapping)?,
            Field::Name => self.name = text(attrs, mapping)?.to_string(),
            Field::Address => self.address = text(attrs, mapping)?.to_string(),
            Field::Description => self.description = text(attrs, mapping)?.to_string(),
            Field::Hours => self.hours = text(attrs, mapping)?.to_string(),
            Field::AverageRating => self.average_rating = number(attrs, mapping)?,
        }
        Ok(())
    }

    pub fn from_attributes(attrs: &Attributes) -> Result<Self, AttributeError> {
        let mut restaurant = Self::default();
        for mapping in &FIELD_MAPPINGS {
            restaurant.decode(mapping, attrs)?;
        }
        Ok(restaurant)
    }
}

fn text<'a>(attrs: &'a Attributes, mapping: &FieldMapping) -> Result<&'a str, AttributeError> {
    attrs
        .get(mapping.attribute)
        .map(String::as_str)
        .ok_or(AttributeError::Missing {
            attribute: mapping.attribute,
        })
}

fn number<T: std::str::FromStr>(attrs: &Attributes, mapping: &FieldMapping) -> Result<T, AttributeError> {
    let value = text(attrs, mapping)?;
    value.trim().parse().map_err(|_| AttributeError::Malformed {
        attribute: mapping.attribute,
        kind: mapping.kind,
        value: value.to_string(),
    })
}
