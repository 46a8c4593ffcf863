//! Parquet encoding of snapshot datasets.
//!
//! Each entity maps to one flat Arrow schema. Timestamps are stored as
//! RFC 3339 strings and a pull request's commit list as a JSON array string,
//! so the files stay readable by any Parquet consumer without extension types.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::{Error, Result};
use crate::models::{Commit, PullRequest, Repository};

/// An entity that is persisted as one columnar file per snapshot.
pub trait Dataset: Sized {
    /// File name inside the snapshot, e.g. `commits.parquet`.
    const FILE_NAME: &'static str;

    fn schema() -> SchemaRef;

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch>;

    fn from_record_batch(batch: &RecordBatch) -> Result<Vec<Self>>;
}

/// Serializes rows into an in-memory Parquet file.
pub fn encode<D: Dataset>(rows: &[D]) -> Result<Bytes> {
    let batch = D::to_record_batch(rows)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buf))
}

pub fn decode<D: Dataset>(bytes: Bytes) -> Result<Vec<D>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(D::from_record_batch(&batch?)?);
    }
    Ok(rows)
}

impl Dataset for Repository {
    const FILE_NAME: &'static str = "repositories.parquet";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("repo_name", DataType::Utf8, false),
            Field::new("last_updated", DataType::Utf8, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| &r.repo_name))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.last_updated.to_rfc3339()),
            )),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_record_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let names = string_column(batch, "repo_name")?;
        let updated = string_column(batch, "last_updated")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(Repository {
                    repo_name: names.value(i).to_string(),
                    last_updated: parse_time(updated.value(i))?,
                })
            })
            .collect()
    }
}

impl Dataset for Commit {
    const FILE_NAME: &'static str = "commits.parquet";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("sha", DataType::Utf8, false),
            Field::new("message", DataType::Utf8, false),
            Field::new("author_name", DataType::Utf8, false),
            Field::new("author_email", DataType::Utf8, false),
            Field::new("author_date", DataType::Utf8, true),
            Field::new("url", DataType::Utf8, false),
            Field::new("repo_name", DataType::Utf8, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.sha))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.message))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.author_name))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.author_email))),
            Arc::new(StringArray::from_iter(
                rows.iter().map(|c| c.author_date.map(|d| d.to_rfc3339())),
            )),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.url))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|c| &c.repo_name))),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_record_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let sha = string_column(batch, "sha")?;
        let message = string_column(batch, "message")?;
        let author_name = string_column(batch, "author_name")?;
        let author_email = string_column(batch, "author_email")?;
        let author_date = string_column(batch, "author_date")?;
        let url = string_column(batch, "url")?;
        let repo_name = string_column(batch, "repo_name")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(Commit {
                    sha: sha.value(i).to_string(),
                    message: message.value(i).to_string(),
                    author_name: author_name.value(i).to_string(),
                    author_email: author_email.value(i).to_string(),
                    author_date: optional(author_date, i).map(parse_time).transpose()?,
                    url: url.value(i).to_string(),
                    repo_name: repo_name.value(i).to_string(),
                })
            })
            .collect()
    }
}

impl Dataset for PullRequest {
    const FILE_NAME: &'static str = "pull_requests.parquet";

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("number", DataType::UInt64, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("author_login", DataType::Utf8, false),
            Field::new("author_email", DataType::Utf8, true),
            Field::new("created_at", DataType::Utf8, true),
            Field::new("state", DataType::Utf8, false),
            Field::new("comments", DataType::UInt32, false),
            Field::new("review_comments", DataType::UInt32, false),
            Field::new("commit_shas", DataType::Utf8, false),
            Field::new("url", DataType::Utf8, false),
            Field::new("repo_name", DataType::Utf8, false),
        ]))
    }

    fn to_record_batch(rows: &[Self]) -> Result<RecordBatch> {
        let commit_shas = rows
            .iter()
            .map(|pr| serde_json::to_string(&pr.commit_shas))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt64Array::from_iter_values(rows.iter().map(|pr| pr.number))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|pr| &pr.title))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|pr| &pr.author_login))),
            Arc::new(StringArray::from_iter(rows.iter().map(|pr| pr.author_email.as_deref()))),
            Arc::new(StringArray::from_iter(
                rows.iter().map(|pr| pr.created_at.map(|d| d.to_rfc3339())),
            )),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|pr| &pr.state))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|pr| pr.comments))),
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|pr| pr.review_comments))),
            Arc::new(StringArray::from_iter_values(commit_shas)),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|pr| &pr.url))),
            Arc::new(StringArray::from_iter_values(rows.iter().map(|pr| &pr.repo_name))),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }

    fn from_record_batch(batch: &RecordBatch) -> Result<Vec<Self>> {
        let number = typed_column::<UInt64Array>(batch, "number")?;
        let title = string_column(batch, "title")?;
        let author_login = string_column(batch, "author_login")?;
        let author_email = string_column(batch, "author_email")?;
        let created_at = string_column(batch, "created_at")?;
        let state = string_column(batch, "state")?;
        let comments = typed_column::<UInt32Array>(batch, "comments")?;
        let review_comments = typed_column::<UInt32Array>(batch, "review_comments")?;
        let commit_shas = string_column(batch, "commit_shas")?;
        let url = string_column(batch, "url")?;
        let repo_name = string_column(batch, "repo_name")?;

        (0..batch.num_rows())
            .map(|i| {
                Ok(PullRequest {
                    number: number.value(i),
                    title: title.value(i).to_string(),
                    author_login: author_login.value(i).to_string(),
                    author_email: optional(author_email, i).map(str::to_string),
                    created_at: optional(created_at, i).map(parse_time).transpose()?,
                    state: state.value(i).to_string(),
                    comments: comments.value(i),
                    review_comments: review_comments.value(i),
                    commit_shas: serde_json::from_str(commit_shas.value(i))?,
                    url: url.value(i).to_string(),
                    repo_name: repo_name.value(i).to_string(),
                })
            })
            .collect()
    }
}

fn typed_column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a A> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::Schema(format!("missing column `{}`", name)))?
        .as_any()
        .downcast_ref::<A>()
        .ok_or_else(|| Error::Schema(format!("column `{}` has unexpected type", name)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    typed_column::<StringArray>(batch, name)
}

fn optional(array: &StringArray, i: usize) -> Option<&str> {
    array.is_valid(i).then(|| array.value(i))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Schema(format!("invalid timestamp {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_commits() -> Vec<Commit> {
        vec![
            Commit {
                sha: "a1".to_string(),
                message: "Initial commit\n\nwith body".to_string(),
                author_name: "Ada".to_string(),
                author_email: "ada@example.com".to_string(),
                author_date: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).single(),
                url: "https://github.com/o/r/commit/a1".to_string(),
                repo_name: "o/r".to_string(),
            },
            Commit {
                sha: "b2".to_string(),
                message: "No date".to_string(),
                author_name: String::new(),
                author_email: String::new(),
                author_date: None,
                url: "https://github.com/o/r/commit/b2".to_string(),
                repo_name: "o/r".to_string(),
            },
        ]
    }

    #[test]
    fn test_commits_survive_parquet() {
        let commits = sample_commits();
        let bytes = encode(&commits).unwrap();
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(decode::<Commit>(bytes).unwrap(), commits);
    }

    #[test]
    fn test_pull_request_nullable_fields() {
        let prs = vec![PullRequest {
            number: 42,
            title: "Add feature".to_string(),
            author_login: "octocat".to_string(),
            author_email: None,
            created_at: None,
            state: "closed".to_string(),
            comments: 3,
            review_comments: 0,
            commit_shas: vec!["a1".to_string(), "b2".to_string()],
            url: "https://github.com/o/r/pull/42".to_string(),
            repo_name: "o/r".to_string(),
        }];
        let decoded = decode::<PullRequest>(encode(&prs).unwrap()).unwrap();
        assert_eq!(decoded, prs);
    }

    #[test]
    fn test_commit_shas_stored_as_json_list() {
        let prs = vec![PullRequest {
            number: 1,
            title: "t".to_string(),
            author_login: "u".to_string(),
            author_email: Some("u@example.com".to_string()),
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single(),
            state: "open".to_string(),
            comments: 0,
            review_comments: 0,
            commit_shas: vec!["x".to_string()],
            url: String::new(),
            repo_name: "o/r".to_string(),
        }];
        let batch = PullRequest::to_record_batch(&prs).unwrap();
        let shas = string_column(&batch, "commit_shas").unwrap();
        assert_eq!(shas.value(0), r#"["x"]"#);
    }

    #[test]
    fn test_schema_mismatch_is_reported() {
        let bytes = encode(&sample_commits()).unwrap();
        let err = decode::<Repository>(bytes).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
