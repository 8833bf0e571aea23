//! Column ordering applied before statements are rendered.

use std::fmt;

use relmap_core::Column;

/// Orders columns before they are rendered into a statement.
pub trait ColumnSorter: Send + Sync + fmt::Debug {
    fn sort(&self, columns: &mut [Column]);
}

/// Keeps the order columns were given in.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationOrder;

impl ColumnSorter for DeclarationOrder {
    fn sort(&self, _columns: &mut [Column]) {}
}

/// Case-insensitive ordering by column name.
///
/// Useful to get the same SQL text whatever order the mapping produced its
/// columns in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameOrder;

impl ColumnSorter for NameOrder {
    fn sort(&self, columns: &mut [Column]) {
        columns.sort_by_key(|c| c.name().to_lowercase());
    }
}
