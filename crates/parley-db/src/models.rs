/// Raw `documents` row; JSON columns are still text here.
pub struct DocumentRow {
    pub seq: i64,
    pub collection: String,
    pub id: String,
    pub fields: String,
    pub permissions: String,
    pub created_at: String,
}

/// User directory entry.
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
}
