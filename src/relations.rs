//! Teacher/student edges derived from hadith chains.
//!
//! For every chain, the narrator at position `k` is the teacher of the
//! narrator at position `k + 1`. `narrator_relations.count` holds how many
//! chains contain that adjacent pair; rows never hold a zero count.

use anyhow::Result;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

/// Distinct adjacent (teacher, student) pairs of a chain ordered by
/// position, in first-seen order.
pub fn chain_pairs(narrator_ids: &[i64]) -> Vec<(i64, i64)> {
    let mut pairs: Vec<(i64, i64)> = Vec::new();
    for w in narrator_ids.windows(2) {
        let pair = (w[0], w[1]);
        if !pairs.contains(&pair) {
            pairs.push(pair);
        }
    }
    pairs
}

pub async fn record_chain(tx: &mut Transaction<'_, Sqlite>, narrator_ids: &[i64]) -> Result<()> {
    for (teacher, student) in chain_pairs(narrator_ids) {
        sqlx::query(
            r#"
            INSERT INTO narrator_relations (teacher_id, student_id, count)
            VALUES (?, ?, 1)
            ON CONFLICT(teacher_id, student_id) DO UPDATE SET count = count + 1
            "#,
        )
        .bind(teacher)
        .bind(student)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn unrecord_chain(
    tx: &mut Transaction<'_, Sqlite>,
    narrator_ids: &[i64],
) -> Result<()> {
    for (teacher, student) in chain_pairs(narrator_ids) {
        sqlx::query(
            "DELETE FROM narrator_relations WHERE teacher_id = ? AND student_id = ? AND count <= 1",
        )
        .bind(teacher)
        .bind(student)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "UPDATE narrator_relations SET count = count - 1 WHERE teacher_id = ? AND student_id = ?",
        )
        .bind(teacher)
        .bind(student)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Load a hadith's chain as narrator ids ordered by position.
pub async fn chain_ids(tx: &mut Transaction<'_, Sqlite>, hadith_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT narrator_id FROM hadith_narrators WHERE hadith_id = ? ORDER BY position",
    )
    .bind(hadith_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(ids)
}

/// Drop every relation and recompute the table from all stored chains.
///
/// Returns the number of relation rows written.
pub async fn rebuild_relations(pool: &SqlitePool) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM narrator_relations")
        .execute(&mut *tx)
        .await?;

    let rows = sqlx::query(
        r#"
        INSERT INTO narrator_relations (teacher_id, student_id, count)
        SELECT t.narrator_id, s.narrator_id, COUNT(DISTINCT t.hadith_id)
        FROM hadith_narrators t
        JOIN hadith_narrators s
          ON s.hadith_id = t.hadith_id AND s.position = t.position + 1
        GROUP BY t.narrator_id, s.narrator_id
        "#,
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    tracing::info!(rows, "narrator relations rebuilt");
    Ok(rows)
}

/// Snapshot of the relation table, sorted by (teacher, student).
pub async fn all_relations(pool: &SqlitePool) -> Result<Vec<(i64, i64, i64)>> {
    let rows = sqlx::query(
        "SELECT teacher_id, student_id, count FROM narrator_relations ORDER BY teacher_id, student_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get("teacher_id"), r.get("student_id"), r.get("count")))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_pairs() {
        assert_eq!(chain_pairs(&[1, 2, 3]), vec![(1, 2), (2, 3)]);
        assert!(chain_pairs(&[5]).is_empty());
        assert!(chain_pairs(&[]).is_empty());
        assert_eq!(chain_pairs(&[1, 2, 1, 2]), vec![(1, 2), (2, 1)]);
    }

    #[tokio::test]
    async fn test_repeated_pair_counts_once_per_chain() {
        use crate::hadiths::{create_hadith, delete_hadith};
        use crate::test_support::{memory_pool, new_hadith, seed_book, seed_narrators};

        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["سفيان", "الزهري"]).await;

        let id = create_hadith(&pool, &new_hadith(source, book, "المكرر", &[n[0], n[1], n[0], n[1]]))
            .await
            .unwrap();
        let incremental = all_relations(&pool).await.unwrap();
        assert_eq!(incremental, vec![(n[0], n[1], 1), (n[1], n[0], 1)]);

        assert_eq!(rebuild_relations(&pool).await.unwrap(), 2);
        assert_eq!(all_relations(&pool).await.unwrap(), incremental);

        delete_hadith(&pool, id).await.unwrap();
        assert!(all_relations(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_counts_follow_writes_and_match_rebuild() {
        use crate::hadiths::{create_hadith, delete_hadith};
        use crate::test_support::{memory_pool, new_hadith, seed_book, seed_narrators};

        let pool = memory_pool().await;
        let (source, book) = seed_book(&pool).await;
        let n = seed_narrators(&pool, &["أبو هريرة", "الأعرج", "أبو الزناد"]).await;

        let h1 = create_hadith(&pool, &new_hadith(source, book, "الأول", &[n[0], n[1], n[2]]))
            .await
            .unwrap();
        create_hadith(&pool, &new_hadith(source, book, "الثاني", &[n[0], n[1]]))
            .await
            .unwrap();

        assert_eq!(
            all_relations(&pool).await.unwrap(),
            vec![(n[0], n[1], 2), (n[1], n[2], 1)]
        );

        delete_hadith(&pool, h1).await.unwrap();
        let incremental = all_relations(&pool).await.unwrap();
        assert_eq!(incremental, vec![(n[0], n[1], 1)]);

        assert_eq!(rebuild_relations(&pool).await.unwrap(), 1);
        assert_eq!(all_relations(&pool).await.unwrap(), incremental);
    }
}
