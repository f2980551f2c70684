use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::history::History;
use crate::schedule::{Schedule, ScheduledTweet};

/// The time window a plan was computed over: `(from, to]`. `from` is `None`
/// only on the very first run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanPeriod {
    pub from: Option<DateTime<Utc>>,
    pub to: DateTime<Utc>,
}

/// The due subset of the schedule for one run, plus the history it was
/// computed against. Entries are clones; executing a plan never touches the
/// canonical schedule.
#[derive(Debug, Clone)]
pub struct Plan {
    pub now: DateTime<Utc>,
    pub plan_period: PlanPeriod,
    pub entries: Vec<ScheduledTweet>,
    pub history: History,
}

/// Compute the due entries: a tweet is due iff any of its triggers lands in
/// the window `(history.lastRun, now]`. Triggers that fail to resolve never
/// match. Pure; `now` is the only clock input.
///
/// Note the first-run behavior: with `lastRun == 0` every trigger at or
/// before `now` is in the window, so a fresh deployment of an old schedule
/// executes its entire backlog in one run. That is intentional.
pub fn resolve(history: Option<History>, schedule: &Schedule, now: DateTime<Utc>) -> Plan {
    let history = history.unwrap_or_default();
    let last_run = history.last_run;
    let now_ms = now.timestamp_millis();

    let entries = schedule
        .tweets
        .iter()
        .filter(|tweet| {
            tweet.schedule.iter().any(|trigger| {
                trigger
                    .resolve()
                    .map(|t| t.timestamp_millis())
                    .is_some_and(|ms| ms > last_run && ms <= now_ms)
            })
        })
        .cloned()
        .collect();

    Plan {
        now,
        plan_period: PlanPeriod {
            from: if last_run == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_run).single()
            },
            to: now,
        },
        entries,
        history,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::Trigger;

    fn tweet(text: &str, triggers: Vec<Trigger>) -> ScheduledTweet {
        ScheduledTweet {
            text: text.into(),
            schedule: triggers,
            media: vec![],
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn entry_is_due_iff_a_trigger_is_inside_the_window() {
        let last_run = at("2024-01-01T00:00:00Z");
        let now = at("2024-01-02T00:00:00Z");
        let history = History {
            last_run: last_run.timestamp_millis(),
            recent_tweets: vec![],
        };
        let schedule = Schedule {
            tweets: vec![
                tweet("at lower bound", vec![Trigger::Millis(last_run.timestamp_millis())]),
                tweet("inside", vec![Trigger::Text("2024-01-01T12:00:00Z".into())]),
                tweet("at upper bound", vec![Trigger::Millis(now.timestamp_millis())]),
                tweet("future", vec![Trigger::Text("2024-01-03T00:00:00Z".into())]),
            ],
        };

        let plan = resolve(Some(history), &schedule, now);
        let texts: Vec<&str> = plan.entries.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["inside", "at upper bound"]);
    }

    #[test]
    fn malformed_trigger_never_matches() {
        let now = at("2024-01-02T00:00:00Z");
        let schedule = Schedule {
            tweets: vec![
                tweet("only junk", vec![Trigger::Text("soonish".into())]),
                tweet(
                    "junk plus due",
                    vec![
                        Trigger::Text("soonish".into()),
                        Trigger::Text("2024-01-01T12:00:00Z".into()),
                    ],
                ),
            ],
        };

        let plan = resolve(None, &schedule, now);
        let texts: Vec<&str> = plan.entries.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["junk plus due"]);
    }

    #[test]
    fn first_run_matches_the_whole_backlog() {
        let now = at("2024-01-02T00:00:00Z");
        let schedule = Schedule {
            tweets: vec![
                tweet("ancient", vec![Trigger::Text("2019-06-01T00:00:00Z".into())]),
                tweet("recent", vec![Trigger::Text("2024-01-01T12:00:00Z".into())]),
            ],
        };

        let plan = resolve(None, &schedule, now);
        assert_eq!(plan.entries.len(), 2);
        assert_eq!(plan.plan_period.from, None);
        assert_eq!(plan.plan_period.to, now);
    }

    #[test]
    fn plan_period_from_is_set_after_a_prior_run() {
        let last_run = at("2024-01-01T00:00:00Z");
        let history = History {
            last_run: last_run.timestamp_millis(),
            recent_tweets: vec![],
        };
        let plan = resolve(Some(history), &Schedule::default(), at("2024-01-02T00:00:00Z"));
        assert_eq!(plan.plan_period.from, Some(last_run));
    }

    #[test]
    fn resolution_does_not_mutate_the_schedule() {
        let now = at("2024-01-02T00:00:00Z");
        let schedule = Schedule {
            tweets: vec![tweet("due", vec![Trigger::Text("2024-01-01T12:00:00Z".into())])],
        };
        let before = schedule.clone();

        let mut plan = resolve(None, &schedule, now);
        plan.entries[0].text = "mutated copy".into();

        assert_eq!(schedule, before);
    }

    #[test]
    fn identical_inputs_resolve_identically() {
        let now = at("2024-01-02T00:00:00Z");
        let schedule = Schedule {
            tweets: vec![tweet("due", vec![Trigger::Text("2024-01-01T12:00:00Z".into())])],
        };

        let a = resolve(None, &schedule, now);
        let b = resolve(None, &schedule, now);
        assert_eq!(a.entries, b.entries);
        assert_eq!(a.plan_period, b.plan_period);
        assert_eq!(a.history, b.history);
    }
}
