//! Read-only aggregations over query history: usage stats, popular
//! questions, daily trends, and backend usage share.

use crate::error::Result;
use crate::storage::{AnalyticsCounters, QueryRecord, Storage};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_queries: i64,
    pub total_documents: i64,
    pub avg_response_time: f64,
    pub successful_queries: i64,
    pub failed_queries: i64,
    pub most_used_llm: Option<String>,
    pub last_updated: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopularQuestion {
    pub question: String,
    pub frequency: usize,
    pub avg_response_time: f64,
    pub success_rate: f64,
    pub last_asked: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PopularQuestionsReport {
    pub questions: Vec<PopularQuestion>,
    pub distinct_question_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub total_queries: i64,
    pub successful_queries: i64,
    pub success_rate: f64,
    pub avg_response_time: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmUsage {
    pub counts: HashMap<String, i64>,
    pub top: Option<String>,
}

pub struct Analytics {
    storage: Storage,
}

impl Analytics {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Recompute stats from query history and overwrite the persisted
    /// counters row with the live totals.
    pub async fn stats(&self, total_documents: i64) -> Result<Stats> {
        let records = self.storage.all_query_records().await?;

        let successful_queries = records.iter().filter(|r| r.success).count() as i64;
        let failed_queries = records.len() as i64 - successful_queries;

        let avg_response_time = if successful_queries > 0 {
            records.iter().filter(|r| r.success).map(|r| r.response_time).sum::<f64>()
                / successful_queries as f64
        } else {
            0.0
        };

        let most_used_llm = most_frequent_llm(&records);

        let counters = AnalyticsCounters {
            total_queries: records.len() as i64,
            total_documents,
            avg_response_time,
            last_updated: Utc::now(),
        };
        self.storage.save_analytics_counters(&counters).await?;

        Ok(Stats {
            total_queries: counters.total_queries,
            total_documents: counters.total_documents,
            avg_response_time: counters.avg_response_time,
            successful_queries,
            failed_queries,
            most_used_llm,
            last_updated: counters.last_updated,
        })
    }

    pub async fn popular_questions(
        &self,
        min_frequency: usize,
        limit: usize,
    ) -> Result<PopularQuestionsReport> {
        let limit = limit.min(50);
        let records = self.storage.all_query_records().await?;

        let mut groups: HashMap<String, Vec<&QueryRecord>> = HashMap::new();
        for r in &records {
            groups.entry(r.similarity_hash.clone()).or_default().push(r);
        }

        let distinct_question_count = groups.len();

        let mut questions: Vec<PopularQuestion> = groups
            .into_iter()
            .filter(|(_, members)| members.len() >= min_frequency)
            .map(|(_, members)| {
                let frequency = members.len();
                let avg_response_time =
                    members.iter().map(|m| m.response_time).sum::<f64>() / frequency as f64;
                let success_rate = members.iter().filter(|m| m.success).count() as f64
                    / frequency as f64
                    * 100.0;
                let last_asked = members.iter().map(|m| m.created_at).max().unwrap();
                PopularQuestion {
                    question: members[0].question.clone(),
                    frequency,
                    avg_response_time,
                    success_rate,
                    last_asked,
                }
            })
            .collect();

        questions.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        questions.truncate(limit);

        Ok(PopularQuestionsReport {
            questions,
            distinct_question_count,
        })
    }

    pub async fn trends(&self, days: u32) -> Result<Vec<DailyTrend>> {
        let days = days.clamp(1, 365);
        let records = self.storage.all_query_records().await?;
        let today = Utc::now().date_naive();
        let start = today - chrono::Duration::days(days as i64 - 1);

        let mut by_date: HashMap<NaiveDate, Vec<&QueryRecord>> = HashMap::new();
        for r in &records {
            let date = r.created_at.date_naive();
            if date >= start && date <= today {
                by_date.entry(date).or_default().push(r);
            }
        }

        let mut trends = Vec::with_capacity(days as usize);
        let mut date = start;
        while date <= today {
            let members = by_date.get(&date).cloned().unwrap_or_default();
            let total_queries = members.len() as i64;
            let successful_queries = members.iter().filter(|m| m.success).count() as i64;
            let success_rate = if total_queries > 0 {
                round2(successful_queries as f64 / total_queries as f64 * 100.0)
            } else {
                0.0
            };
            let avg_response_time = if total_queries > 0 {
                round2(members.iter().map(|m| m.response_time).sum::<f64>() / total_queries as f64)
            } else {
                0.0
            };
            trends.push(DailyTrend {
                date,
                total_queries,
                successful_queries,
                success_rate,
                avg_response_time,
            });
            date += chrono::Duration::days(1);
        }

        Ok(trends)
    }

    pub async fn llm_usage(&self) -> Result<LlmUsage> {
        let records = self.storage.all_query_records().await?;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for r in &records {
            if let Some(llm) = &r.llm_used {
                *counts.entry(llm.clone()).or_insert(0) += 1;
            }
        }
        let top = top_key(&counts);
        Ok(LlmUsage { counts, top })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn most_frequent_llm(records: &[QueryRecord]) -> Option<String> {
    let mut counts: HashMap<String, i64> = HashMap::new();
    for r in records {
        if let Some(llm) = &r.llm_used {
            *counts.entry(llm.clone()).or_insert(0) += 1;
        }
    }
    top_key(&counts)
}

/// Picks the highest-count key, breaking ties lexicographically.
fn top_key(counts: &HashMap<String, i64>) -> Option<String> {
    counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(k, _)| k.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, llm: &str, success: bool, response_time: f64) -> QueryRecord {
        QueryRecord {
            id: 0,
            question: format!("question for {hash}"),
            answer: Some("answer".to_string()),
            sources_count: 1,
            response_time,
            llm_used: Some(llm.to_string()),
            context_chunks_count: 1,
            success,
            similarity_hash: hash.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_stats_averages_only_successful() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        storage.insert_query_record(&record("a", "openai", true, 1.0)).await.unwrap();
        storage.insert_query_record(&record("b", "openai", false, 100.0)).await.unwrap();

        let analytics = Analytics::new(storage);
        let stats = analytics.stats(0).await.unwrap();
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.successful_queries, 1);
        assert_eq!(stats.failed_queries, 1);
        assert_eq!(stats.avg_response_time, 1.0);
    }

    #[tokio::test]
    async fn test_popular_questions_groups_by_similarity_hash() {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        storage.insert_query_record(&record("same", "openai", true, 1.0)).await.unwrap();
        storage.insert_query_record(&record("same", "openai", true, 3.0)).await.unwrap();
        storage.insert_query_record(&record("other", "groq", true, 1.0)).await.unwrap();

        let analytics = Analytics::new(storage);
        let report = analytics.popular_questions(2, 10).await.unwrap();
        assert_eq!(report.questions.len(), 1);
        assert_eq!(report.questions[0].frequency, 2);
        assert_eq!(report.questions[0].avg_response_time, 2.0);
        assert_eq!(report.distinct_question_count, 2);
    }

    #[test]
    fn test_top_key_breaks_ties_lexicographically() {
        let mut counts = HashMap::new();
        counts.insert("zebra".to_string(), 5);
        counts.insert("apple".to_string(), 5);
        assert_eq!(top_key(&counts), Some("apple".to_string()));
    }
}
