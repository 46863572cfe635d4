use crate::{
    DbConn,
    error::Result,
    models::document::{Document, DocumentKind},
};

const DOCUMENT_COLUMNS: &str =
    "id, conversation_id, filename, content, doc_kind, is_active, uploaded_at";

/// Inserts a document record. Duplicate filenames within a conversation are
/// allowed and disambiguated by id.
pub async fn insert_document(
    conn: &mut DbConn,
    conversation_id: i64,
    filename: &str,
    content: Option<&str>,
    doc_kind: DocumentKind,
) -> Result<Document> {
    let document = sqlx::query_as::<_, Document>(&format!(
        r#"
        INSERT INTO documents (conversation_id, filename, content, doc_kind)
        VALUES ($1, $2, $3, $4)
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(conversation_id)
    .bind(filename)
    .bind(content)
    .bind(doc_kind)
    .fetch_one(conn)
    .await?;

    Ok(document)
}

pub async fn get_document(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
) -> Result<Option<Document>> {
    let document = sqlx::query_as::<_, Document>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = $1 AND conversation_id = $2"
    ))
    .bind(document_id)
    .bind(conversation_id)
    .fetch_optional(conn)
    .await?;

    Ok(document)
}

/// Fetches a document of a specific kind (used by the note endpoints).
pub async fn get_document_of_kind(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
    doc_kind: DocumentKind,
) -> Result<Option<Document>> {
    let document = sqlx::query_as::<_, Document>(&format!(
        r#"
        SELECT {DOCUMENT_COLUMNS} FROM documents
        WHERE id = $1 AND conversation_id = $2 AND doc_kind = $3
        "#
    ))
    .bind(document_id)
    .bind(conversation_id)
    .bind(doc_kind)
    .fetch_optional(conn)
    .await?;

    Ok(document)
}

pub async fn list_documents(conn: &mut DbConn, conversation_id: i64) -> Result<Vec<Document>> {
    let documents = sqlx::query_as::<_, Document>(&format!(
        "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE conversation_id = $1 ORDER BY id ASC"
    ))
    .bind(conversation_id)
    .fetch_all(conn)
    .await?;

    Ok(documents)
}

/// Ids of documents that participate in retrieval.
pub async fn list_active_document_ids(
    conn: &mut DbConn,
    conversation_id: i64,
) -> Result<Vec<i64>> {
    let ids: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM documents WHERE conversation_id = $1 AND is_active ORDER BY id ASC",
    )
    .bind(conversation_id)
    .fetch_all(conn)
    .await?;

    Ok(ids.into_iter().map(|(id,)| id).collect())
}

pub async fn set_document_active(
    conn: &mut DbConn,
    conversation_id: i64,
    document_id: i64,
    is_active: bool,
) -> Result<Option<Document>> {
    let document = sqlx::query_as::<_, Document>(&format!(
        r#"
        UPDATE documents SET is_active = $3
        WHERE id = $1 AND conversation_id = $2
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(document_id)
    .bind(conversation_id)
    .bind(is_active)
    .fetch_optional(conn)
    .await?;

    Ok(document)
}

pub async fn update_note(
    conn: &mut DbConn,
    conversation_id: i64,
    note_id: i64,
    title: Option<&str>,
    content: Option<&str>,
) -> Result<Option<Document>> {
    let document = sqlx::query_as::<_, Document>(&format!(
        r#"
        UPDATE documents
        SET filename = COALESCE($3, filename), content = COALESCE($4, content)
        WHERE id = $1 AND conversation_id = $2 AND doc_kind = 'note'
        RETURNING {DOCUMENT_COLUMNS}
        "#
    ))
    .bind(note_id)
    .bind(conversation_id)
    .bind(title)
    .bind(content)
    .fetch_optional(conn)
    .await?;

    Ok(document)
}

pub async fn delete_document(conn: &mut DbConn, document_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(document_id)
        .execute(conn)
        .await?;

    Ok(())
}
