// SHARDBENCH THREAD SCHEDULES
// MAPS A SWEEP STEP INDEX TO A CLIENT THREAD COUNT.
//
// A ThreadSchedule IS A START VALUE PLUS ORDERED RULES. EACH RULE CONTRIBUTES
// `count` STEPS (UNBOUNDED WHEN ABSENT) OF EITHER +n OR xn:
//
//   start = 1, rules = [{count = 9, add = 1}, {count = 9, add = 10}, {mul = 2}]
//   -> 1 2 3 .. 10 20 30 .. 100 200 400 800 ..
//
// INDEX 0 IS ALWAYS `start`. PAST THE LAST BOUNDED RULE THE SCHEDULE ENDS.

use serde::{Deserialize, Serialize};

pub trait Schedule {
    fn threads_at(&self, index: usize) -> Option<u32>;
}

impl<F: Fn(usize) -> Option<u32>> Schedule for F {
    fn threads_at(&self, index: usize) -> Option<u32> {
        self(index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Add(u32),
    Mul(u32),
}

impl Step {
    fn apply(self, from: u32, times: usize) -> Option<u32> {
        match self {
            Step::Add(n) => {
                let delta = u32::try_from(times).ok()?.checked_mul(n)?;
                from.checked_add(delta)
            }
            Step::Mul(1) => Some(from),
            Step::Mul(n) => {
                let factor = n.checked_pow(u32::try_from(times).ok()?)?;
                from.checked_mul(factor)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(flatten)]
    pub step: Step,
}

impl StepRule {
    pub fn add(count: usize, n: u32) -> Self {
        Self { count: Some(count), step: Step::Add(n) }
    }

    pub fn mul(count: usize, n: u32) -> Self {
        Self { count: Some(count), step: Step::Mul(n) }
    }

    pub fn forever(step: Step) -> Self {
        Self { count: None, step }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSchedule {
    pub start: u32,
    pub rules: Vec<StepRule>,
}

impl ThreadSchedule {
    pub fn new(start: u32, rules: Vec<StepRule>) -> Self {
        Self { start, rules }
    }

    // NUMBER OF STEPS. None WHEN SOME RULE IS UNBOUNDED. NEVER ZERO: INDEX 0
    // IS ALWAYS `start`.
    pub fn step_count(&self) -> Option<usize> {
        self.rules
            .iter()
            .try_fold(1usize, |acc, r| r.count.map(|c| acc + c))
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..).map_while(move |i| self.threads_at(i))
    }
}

impl Default for ThreadSchedule {
    fn default() -> Self {
        Self {
            start: 1,
            rules: vec![
                StepRule::add(9, 1),
                StepRule::add(9, 10),
                StepRule::forever(Step::Mul(2)),
            ],
        }
    }
}

impl Schedule for ThreadSchedule {
    fn threads_at(&self, index: usize) -> Option<u32> {
        let mut threads = self.start;
        let mut remaining = index;
        for rule in &self.rules {
            if remaining == 0 {
                break;
            }
            let take = rule.count.map_or(remaining, |c| c.min(remaining));
            threads = rule.step.apply(threads, take)?;
            remaining -= take;
        }
        if remaining == 0 {
            Some(threads)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_shape() {
        let s = ThreadSchedule::default();
        let first: Vec<u32> = s.iter().take(22).collect();
        assert_eq!(
            first,
            vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 200, 400, 800]
        );
        assert_eq!(s.step_count(), None);
    }

    #[test]
    fn bounded_schedule_ends() {
        let s = ThreadSchedule::new(4, vec![StepRule::add(2, 4), StepRule::mul(2, 2)]);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![4, 8, 12, 24, 48]);
        assert_eq!(s.step_count(), Some(5));
        assert_eq!(s.threads_at(5), None);
    }

    #[test]
    fn no_rules_is_single_step() {
        let s = ThreadSchedule::new(7, vec![]);
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![7]);
    }

    #[test]
    fn overflow_ends_schedule() {
        let s = ThreadSchedule::new(1 << 30, vec![StepRule::forever(Step::Mul(4))]);
        assert_eq!(s.threads_at(0), Some(1 << 30));
        assert_eq!(s.threads_at(1), None);
    }

    #[test]
    fn closures_are_schedules() {
        let f = |i: usize| if i < 5 { Some(i as u32 + 1) } else { None };
        assert_eq!(f.threads_at(4), Some(5));
        assert_eq!(f.threads_at(5), None);
    }

    #[test]
    fn rules_deserialize_from_toml() {
        let s: ThreadSchedule = toml::from_str(
            "start = 1\nrules = [{ count = 3, add = 2 }, { mul = 3 }]\n",
        )
        .unwrap();
        assert_eq!(s.rules[0], StepRule::add(3, 2));
        assert_eq!(s.rules[1], StepRule::forever(Step::Mul(3)));
        assert_eq!(s.iter().take(6).collect::<Vec<_>>(), vec![1, 3, 5, 7, 21, 63]);
    }
}
