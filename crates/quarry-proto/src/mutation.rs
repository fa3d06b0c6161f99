//! Write payloads.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::query::{Projection, UniqueWhere};
use crate::value::Value;

/// Field values for a create.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WriteData {
    /// Field values in caller order.
    pub values: Vec<(String, Value)>,
}

impl WriteData {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((field.into(), value.into()));
        self
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }
}

/// An update applied to one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldUpdate {
    /// Overwrite with a value.
    Set(Value),
    /// Add to a numeric field.
    Increment(Value),
    /// Subtract from a numeric field.
    Decrement(Value),
    /// Multiply a numeric field.
    Multiply(Value),
    /// Divide a numeric field.
    Divide(Value),
}

/// Field updates for an update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateData {
    /// Updates in caller order.
    pub updates: Vec<(String, FieldUpdate)>,
}

impl UpdateData {
    /// Empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a field.
    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FieldUpdate::Set(value.into()))
    }

    /// Add to a numeric field.
    pub fn increment(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.with(field, FieldUpdate::Increment(by.into()))
    }

    /// Subtract from a numeric field.
    pub fn decrement(self, field: impl Into<String>, by: impl Into<Value>) -> Self {
        self.with(field, FieldUpdate::Decrement(by.into()))
    }

    /// Apply an arbitrary update.
    pub fn with(mut self, field: impl Into<String>, update: FieldUpdate) -> Self {
        self.updates.push((field.into(), update));
        self
    }
}

impl From<WriteData> for UpdateData {
    fn from(data: WriteData) -> Self {
        Self {
            updates: data
                .values
                .into_iter()
                .map(|(field, value)| (field, FieldUpdate::Set(value)))
                .collect(),
        }
    }
}

/// Arguments of `create`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateArgs {
    /// Field values.
    pub data: WriteData,
    /// Shape of the returned row.
    pub projection: Projection,
}

impl CreateArgs {
    /// Create with the given data.
    pub fn new(data: WriteData) -> Self {
        Self {
            data,
            projection: Projection::default(),
        }
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Arguments of `createMany`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateManyArgs {
    /// Rows to insert.
    pub data: Vec<WriteData>,
    /// Drop rows that hit a unique constraint instead of failing.
    pub skip_duplicates: bool,
}

impl CreateManyArgs {
    /// Insert the given rows.
    pub fn new(data: Vec<WriteData>) -> Self {
        Self {
            data,
            skip_duplicates: false,
        }
    }

    /// Enable skip-duplicates.
    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

/// Arguments of `update`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateArgs {
    /// Row to update.
    pub unique: UniqueWhere,
    /// Updates to apply.
    pub data: UpdateData,
    /// Shape of the returned row.
    pub projection: Projection,
}

impl UpdateArgs {
    /// Update the row identified by `unique`.
    pub fn new(unique: UniqueWhere, data: UpdateData) -> Self {
        Self {
            unique,
            data,
            projection: Projection::default(),
        }
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Arguments of `updateMany`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateManyArgs {
    /// Rows to update.
    pub filter: Option<Filter>,
    /// Updates to apply.
    pub data: UpdateData,
    /// Maximum number of rows to update.
    pub limit: Option<u64>,
}

impl UpdateManyArgs {
    /// Update every row matching `filter`.
    pub fn new(filter: Option<Filter>, data: UpdateData) -> Self {
        Self {
            filter,
            data,
            limit: None,
        }
    }

    /// Cap the number of updated rows.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Arguments of `upsert`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpsertArgs {
    /// Row to look up.
    pub unique: UniqueWhere,
    /// Data used when the row does not exist.
    pub create: WriteData,
    /// Updates used when the row exists.
    pub update: UpdateData,
    /// Shape of the returned row.
    pub projection: Projection,
}

impl UpsertArgs {
    /// Upsert the row identified by `unique`.
    pub fn new(unique: UniqueWhere, create: WriteData, update: UpdateData) -> Self {
        Self {
            unique,
            create,
            update,
            projection: Projection::default(),
        }
    }
}

/// Arguments of `delete`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteArgs {
    /// Row to delete.
    pub unique: UniqueWhere,
    /// Shape of the returned pre-image.
    pub projection: Projection,
}

impl DeleteArgs {
    /// Delete the row identified by `unique`.
    pub fn new(unique: UniqueWhere) -> Self {
        Self {
            unique,
            projection: Projection::default(),
        }
    }
}

/// Arguments of `deleteMany`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteManyArgs {
    /// Rows to delete.
    pub filter: Option<Filter>,
    /// Maximum number of matching rows to delete.
    pub limit: Option<u64>,
}

impl DeleteManyArgs {
    /// Delete every row matching `filter`.
    pub fn new(filter: Option<Filter>) -> Self {
        Self {
            filter,
            limit: None,
        }
    }

    /// Cap the number of matching rows deleted.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}
