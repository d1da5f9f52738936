//! Scoring of a completed answer ledger against a question snapshot.

use crate::model::{Answer, Question};

/// Returns true when `answer` fully matches the question's correct set.
///
/// A single-choice answer is correct when the chosen index is in the correct
/// set. A multiple-choice answer must equal the correct set exactly; partial
/// selections earn nothing. The unanswered sentinels are never correct.
#[must_use]
pub fn is_correct(question: &Question, answer: &Answer) -> bool {
    let correct = question.correct_options();
    match answer {
        Answer::Single(Some(index)) => correct.contains(index),
        Answer::Single(None) => false,
        Answer::Multiple(selected) => !selected.is_empty() && selected == correct,
    }
}

/// Number of correctly answered questions.
///
/// Questions without a ledger entry count as incorrect.
#[must_use]
pub fn correct_count(questions: &[Question], answers: &[Answer]) -> usize {
    questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| is_correct(q, a))
        .count()
}

/// `round(100 * correct / total)` with halves rounded up, computed in integers.
///
/// Returns 0 for an empty test.
#[must_use]
pub fn percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total) as u64;
    let total = total as u64;
    let rounded = (200 * correct + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Score a session in percent (0..=100).
///
/// Pure: identical inputs always give the same percent.
#[must_use]
pub fn score(questions: &[Question], answers: &[Answer]) -> u8 {
    percent(correct_count(questions, answers), questions.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::QuestionId;

    fn single(id: u64, correct: usize) -> Question {
        Question::with_single_correct(
            QuestionId::new(id),
            u32::try_from(id).unwrap(),
            format!("Question {id}"),
            vec!["A".into(), "B".into(), "C".into()],
            correct,
        )
        .unwrap()
    }

    fn multi(id: u64, correct: &[usize]) -> Question {
        Question::new(
            QuestionId::new(id),
            u32::try_from(id).unwrap(),
            format!("Question {id}"),
            vec!["A".into(), "B".into(), "C".into()],
            correct.iter().copied(),
        )
        .unwrap()
    }

    #[test]
    fn single_choice_uses_membership() {
        let q = single(1, 2);
        assert!(is_correct(&q, &Answer::single(2)));
        assert!(!is_correct(&q, &Answer::single(1)));
    }

    #[test]
    fn multiple_choice_requires_exact_set() {
        let q = multi(1, &[0, 2]);
        assert!(is_correct(&q, &Answer::multiple([0, 2])));
        assert!(!is_correct(&q, &Answer::multiple([0])));
        assert!(!is_correct(&q, &Answer::multiple([0, 1, 2])));
        assert!(!is_correct(&q, &Answer::multiple([])));
    }

    #[test]
    fn every_ledger_value_scores_only_the_correct_index() {
        let q = single(1, 1);
        for raw in -1..3 {
            let answer = Answer::from_index(raw);
            assert_eq!(is_correct(&q, &answer), raw == 1, "ledger value {raw}");
        }
    }

    #[test]
    fn end_to_end_two_of_three_rounds_to_67() {
        let questions = vec![single(1, 1), single(2, 0), single(3, 2)];
        let answers = vec![Answer::single(1), Answer::single(0), Answer::single(0)];
        assert_eq!(score(&questions, &answers), 67);
        assert_eq!(score(&questions, &answers), score(&questions, &answers));
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(1, 2), 50);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(0, 5), 0);
    }

    #[test]
    fn sentinels_and_missing_entries_are_incorrect() {
        let questions = vec![single(1, 0), multi(2, &[0, 1])];
        let answers = vec![Answer::Single(None)];
        assert_eq!(correct_count(&questions, &answers), 0);
        assert_eq!(score(&questions, &answers), 0);
    }
}
