use tabled::{settings::Style, Table, Tabled};
use crate::edge::ReferenceEdge;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, String)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

/// One stored edge as a table row
#[derive(Tabled)]
pub struct EdgeRow {
    #[tabled(rename = "Id")]
    pub id: i64,
    #[tabled(rename = "Referencing")]
    pub referencing: String,
    #[tabled(rename = "Field")]
    pub field: String,
    #[tabled(rename = "Referenced")]
    pub referenced: String,
}

impl From<&ReferenceEdge> for EdgeRow {
    fn from(edge: &ReferenceEdge) -> Self {
        Self {
            id: edge.id,
            referencing: edge.referencing.to_string(),
            field: format!("{}[{}]", edge.field_name, edge.field_delta),
            referenced: edge.referenced.to_string(),
        }
    }
}

pub fn edges_table(edges: &[ReferenceEdge]) -> String {
    if edges.is_empty() {
        return String::new();
    }
    let rows: Vec<EdgeRow> = edges.iter().map(EdgeRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::EntityKey;

    #[test]
    fn test_empty_tables_render_nothing() {
        assert!(TableBuilder::new().build().is_empty());
        assert!(edges_table(&[]).is_empty());
    }

    #[test]
    fn test_edges_table_shows_positions() {
        let edge = ReferenceEdge::new(
            "field_media",
            2,
            EntityKey::new("node", "article", 1, 4),
            EntityKey::unversioned("media", "image", 9),
        );
        let rendered = edges_table(&[edge]);
        assert!(rendered.contains("field_media[2]"));
        assert!(rendered.contains("node/article/1@4"));
        assert!(rendered.contains("media/image/9"));
    }

    #[test]
    fn test_stats_table_rows() {
        let rendered = stats_table(&[("Edges", "3".to_string())]);
        assert!(rendered.contains("Edges"));
        assert!(rendered.contains("3"));
    }
}
