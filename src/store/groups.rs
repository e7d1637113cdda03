//! Group and membership operations.
//!
//! Group rows are upserted by the grouping engine: a recomputed group
//! reuses the id of the stored group it overlaps so that ids stay stable
//! across runs on an unchanged filesystem.

use super::types::{GroupMemberRow, GroupRow, MemberRole, Tier};
use super::{now_ns, Store};
use crate::error::StoreError;
use rusqlite::{params, Row};
use std::path::PathBuf;

/// Member payload for [`Store::persist_group`].
#[derive(Debug, Clone)]
pub struct NewMember {
    pub file_id: i64,
    pub role: MemberRole,
    pub similarity: f64,
    pub note: Option<String>,
}

/// One group with resolved member paths, for listings.
#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub id: i64,
    pub tier: Tier,
    pub confidence: f64,
    pub created_at_ns: i64,
    pub updated_at_ns: i64,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone)]
pub struct MemberSummary {
    pub file_id: i64,
    pub path: PathBuf,
    pub role: MemberRole,
    pub similarity: f64,
    pub note: Option<String>,
}

/// Path-keyed image of a group, taken before a full rebuild.
#[derive(Debug, Clone)]
pub struct GroupSnapshot {
    pub tier: Tier,
    pub confidence: f64,
    pub created_at_ns: i64,
    pub member_paths: Vec<(PathBuf, MemberRole)>,
}

fn map_group_row(row: &Row<'_>) -> rusqlite::Result<GroupRow> {
    let tier_str: String = row.get(1)?;
    Ok(GroupRow {
        id: row.get(0)?,
        tier: Tier::from_str(&tier_str).unwrap_or(Tier::Near),
        confidence: row.get(2)?,
        created_at_ns: row.get(3)?,
        updated_at_ns: row.get(4)?,
    })
}

fn map_member_row(row: &Row<'_>) -> rusqlite::Result<GroupMemberRow> {
    let role_str: String = row.get(2)?;
    Ok(GroupMemberRow {
        group_id: row.get(0)?,
        file_id: row.get(1)?,
        role: MemberRole::from_str(&role_str).unwrap_or(MemberRole::Duplicate),
        similarity: row.get(3)?,
        note: row.get(4)?,
    })
}

impl Store {
    /// Write one group and its members atomically.
    ///
    /// With `reuse_id`, the existing group row keeps its id and creation
    /// time; members are replaced wholesale. Without it a fresh group row
    /// is inserted. `created_at_ns` overrides the creation time for new
    /// rows (used when re-seeding groups from a rebuild snapshot).
    pub fn persist_group(
        &self,
        tier: Tier,
        confidence: f64,
        members: &[NewMember],
        reuse_id: Option<i64>,
        created_at_ns: Option<i64>,
    ) -> Result<i64, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        let now = now_ns();

        let group_id = match reuse_id {
            Some(id) => {
                tx.execute(
                    "UPDATE groups SET tier = ?2, confidence = ?3, updated_at_ns = ?4
                     WHERE id = ?1",
                    params![id, tier.as_str(), confidence, now],
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                tx.execute("DELETE FROM group_members WHERE group_id = ?1", [id])
                    .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO groups (tier, confidence, created_at_ns, updated_at_ns)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![tier.as_str(), confidence, created_at_ns.unwrap_or(now), now],
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                tx.last_insert_rowid()
            }
        };

        for member in members {
            tx.execute(
                "INSERT INTO group_members (group_id, file_id, role, similarity, note)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    group_id,
                    member.file_id,
                    member.role.as_str(),
                    member.similarity,
                    member.note,
                ],
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        Ok(group_id)
    }

    /// Lowest existing group id containing any of the given files.
    pub fn group_containing_any(&self, file_ids: &[i64]) -> Result<Option<i64>, StoreError> {
        if file_ids.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let mut best: Option<i64> = None;

        for chunk in file_ids.chunks(500) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT MIN(group_id) FROM group_members WHERE file_id IN ({})",
                placeholders
            );
            let found: Option<i64> = conn
                .query_row(&sql, rusqlite::params_from_iter(chunk.iter()), |row| {
                    row.get(0)
                })
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            best = match (best, found) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (None, found) => found,
                (best, None) => best,
            };
        }

        Ok(best)
    }

    /// Delete every group whose id is not in the keep set. Membership
    /// rows follow via cascade.
    pub fn delete_groups_except(&self, keep: &[i64]) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        if keep.is_empty() {
            return conn
                .execute("DELETE FROM groups", [])
                .map_err(|e| StoreError::QueryFailed(e.to_string()));
        }
        let placeholders = vec!["?"; keep.len()].join(", ");
        let sql = format!("DELETE FROM groups WHERE id NOT IN ({})", placeholders);
        conn.execute(&sql, rusqlite::params_from_iter(keep.iter()))
            .map_err(|e| StoreError::QueryFailed(e.to_string()))
    }

    pub fn group_by_id(&self, id: i64) -> Result<GroupRow, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, tier, confidence, created_at_ns, updated_at_ns
             FROM groups WHERE id = ?1",
            [id],
            map_group_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                entity: "group",
                id,
            },
            other => StoreError::QueryFailed(other.to_string()),
        })
    }

    pub fn members_of(&self, group_id: i64) -> Result<Vec<GroupMemberRow>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT group_id, file_id, role, similarity, note
                 FROM group_members WHERE group_id = ?1 ORDER BY file_id",
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let mapped = stmt
            .query_map([group_id], map_member_row)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;

        let mut members = Vec::new();
        for row in mapped {
            members.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
        }
        Ok(members)
    }

    /// The member carrying the `original` role, if the group is intact.
    pub fn original_of(&self, group_id: i64) -> Result<Option<GroupMemberRow>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT group_id, file_id, role, similarity, note
             FROM group_members WHERE group_id = ?1 AND role = 'original'",
            [group_id],
            map_member_row,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(StoreError::QueryFailed(other.to_string())),
        })
    }

    /// Every group paired with its members, escalation's working set.
    pub fn groups_with_members(
        &self,
    ) -> Result<Vec<(GroupRow, Vec<GroupMemberRow>)>, StoreError> {
        let groups = {
            let conn = self.conn()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, tier, confidence, created_at_ns, updated_at_ns
                     FROM groups ORDER BY id",
                )
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let mapped = stmt
                .query_map([], map_group_row)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let mut groups = Vec::new();
            for row in mapped {
                groups.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
            }
            groups
        };

        let mut result = Vec::with_capacity(groups.len());
        for group in groups {
            let members = self.members_of(group.id)?;
            result.push((group, members));
        }
        Ok(result)
    }

    /// Change one member's role, replacing its note.
    pub fn update_member_role(
        &self,
        group_id: i64,
        file_id: i64,
        role: MemberRole,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn
            .execute(
                "UPDATE group_members SET role = ?3, note = ?4
                 WHERE group_id = ?1 AND file_id = ?2",
                params![group_id, file_id, role.as_str(), note],
            )
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "group_member",
                id: file_id,
            });
        }
        Ok(())
    }

    /// Group listings with resolved paths. `tier` narrows to one tier;
    /// `safe_only` keeps only groups holding at least one safe duplicate.
    pub fn list_group_summaries(
        &self,
        tier: Option<Tier>,
        safe_only: bool,
    ) -> Result<Vec<GroupSummary>, StoreError> {
        let ids = {
            let conn = self.conn()?;
            let sql = match (tier, safe_only) {
                (Some(_), true) => {
                    "SELECT DISTINCT g.id FROM groups g
                     JOIN group_members m ON m.group_id = g.id
                     WHERE g.tier = ?1 AND m.role = 'safe_duplicate' ORDER BY g.id"
                }
                (Some(_), false) => "SELECT id FROM groups WHERE tier = ?1 ORDER BY id",
                (None, true) => {
                    "SELECT DISTINCT g.id FROM groups g
                     JOIN group_members m ON m.group_id = g.id
                     WHERE m.role = 'safe_duplicate' ORDER BY g.id"
                }
                (None, false) => "SELECT id FROM groups ORDER BY id",
            };
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
            let mut ids: Vec<i64> = Vec::new();
            match tier {
                Some(t) => {
                    let mapped = stmt
                        .query_map([t.as_str()], |row| row.get(0))
                        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                    for row in mapped {
                        ids.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
                    }
                }
                None => {
                    let mapped = stmt
                        .query_map([], |row| row.get(0))
                        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
                    for row in mapped {
                        ids.push(row.map_err(|e| StoreError::QueryFailed(e.to_string()))?);
                    }
                }
            }
            ids
        };

        self.group_summaries_by_ids(&ids)
    }

    /// Summaries for an explicit id set, preserving the given order.
    pub fn group_summaries_by_ids(&self, ids: &[i64]) -> Result<Vec<GroupSummary>, StoreError> {
        let mut summaries = Vec::with_capacity(ids.len());
        for &id in ids {
            let group = self.group_by_id(id)?;
            let members = self.members_of(id)?;
            let mut member_summaries = Vec::with_capacity(members.len());
            for member in members {
                let file = self.file_by_id(member.file_id)?;
                member_summaries.push(MemberSummary {
                    file_id: member.file_id,
                    path: file.path,
                    role: member.role,
                    similarity: member.similarity,
                    note: member.note,
                });
            }
            summaries.push(GroupSummary {
                id: group.id,
                tier: group.tier,
                confidence: group.confidence,
                created_at_ns: group.created_at_ns,
                updated_at_ns: group.updated_at_ns,
                members: member_summaries,
            });
        }
        Ok(summaries)
    }

    /// Path-keyed images of all groups, taken before a full rebuild.
    pub fn snapshot_groups(&self) -> Result<Vec<GroupSnapshot>, StoreError> {
        let summaries = self.list_group_summaries(None, false)?;
        Ok(summaries
            .into_iter()
            .map(|summary| GroupSnapshot {
                tier: summary.tier,
                confidence: summary.confidence,
                created_at_ns: summary.created_at_ns,
                member_paths: summary
                    .members
                    .into_iter()
                    .map(|m| (m.path, m.role))
                    .collect(),
            })
            .collect())
    }

    /// Restore a group's creation time from a rebuild snapshot.
    pub fn set_group_created_at(&self, group_id: i64, created_at_ns: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE groups SET created_at_ns = ?2 WHERE id = ?1",
            params![group_id, created_at_ns],
        )
        .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Wipe everything except the schema version: full-rebuild reset.
    /// Callers snapshot whatever they intend to preserve first.
    pub fn truncate_for_rebuild(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))?;
        for sql in [
            "DELETE FROM group_members",
            "DELETE FROM groups",
            "DELETE FROM features",
            "DELETE FROM manual_overrides",
            "DELETE FROM files",
        ] {
            tx.execute(sql, [])
                .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| StoreError::TransactionFailed(e.to_string()))
    }
}
