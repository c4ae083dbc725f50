//! Picks the answer cards shown next to a target word.

use std::collections::HashSet;
use std::rc::Rc;

use rand::Rng;
use rand::seq::SliceRandom;
use vocab_utils::Word;
use vocab_utils::media::image_identity;
use vocab_utils::text_cleanup::normalize_option_text;

/// Asked before each card beyond the minimum whether there is room for it.
pub trait OptionLayout {
    fn can_add_option(&self, current_count: usize) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UnboundedLayout;

impl OptionLayout for UnboundedLayout {
    fn can_add_option(&self, _current_count: usize) -> bool {
        true
    }
}

/// Stops at a fixed number of cards.
#[derive(Clone, Copy, Debug)]
pub struct FixedLayout(pub usize);

impl OptionLayout for FixedLayout {
    fn can_add_option(&self, current_count: usize) -> bool {
        current_count < self.0
    }
}

pub struct OptionRequest<'a> {
    pub target: &'a Rc<Word>,
    pub desired: usize,
    /// The option pool of the target's own category.
    pub primary: &'a [Rc<Word>],
    /// Option pools of the other loaded categories.
    pub supplemental: &'a [Rc<Word>],
    /// Cards show text, so two cards must not read the same.
    pub text_mode: bool,
    pub min_options: usize,
    pub max_options: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pass {
    Strict,
    Relaxed,
    Fallback,
}

/// Build the answer cards for `request`. The target is always first.
///
/// Candidates are tried first-fit in shuffled order over three passes: a
/// strict pass over the target's own category, a relaxed pass that also
/// draws from other categories and ignores pairwise conflicts, and a last
/// pass that only refuses duplicate ids. `on_accept` runs for every card
/// added after the target.
pub fn build_options(
    request: &OptionRequest<'_>,
    rng: &mut impl Rng,
    layout: &dyn OptionLayout,
    on_accept: &mut dyn FnMut(&Rc<Word>),
) -> Vec<Rc<Word>> {
    let target = request.target;
    let min = request.min_options.max(1);
    let desired = request
        .desired
        .clamp(min, request.max_options.max(min))
        .min(request.primary.len().max(min));

    let mut primary: Vec<Rc<Word>> = request.primary.to_vec();
    primary.shuffle(rng);
    // Words sharing an option group with the target make the best distractors.
    primary.sort_by_key(|w| !w.shares_option_group(target));

    let mut supplemental: Vec<Rc<Word>> = request.supplemental.to_vec();
    supplemental.shuffle(rng);
    let combined: Vec<Rc<Word>> = primary.iter().chain(supplemental.iter()).cloned().collect();

    let mut chosen = vec![Rc::clone(target)];
    let mut texts: HashSet<String> = HashSet::new();
    if request.text_mode {
        texts.insert(normalize_option_text(target.display_text()));
    }

    for (pass, pool) in [
        (Pass::Strict, &primary),
        (Pass::Relaxed, &combined),
        (Pass::Fallback, &combined),
    ] {
        for candidate in pool {
            if chosen.len() >= desired {
                break;
            }
            if chosen.len() >= min && !layout.can_add_option(chosen.len()) {
                return chosen;
            }
            if !acceptable(candidate, &chosen, &texts, request.text_mode, pass) {
                continue;
            }
            if request.text_mode {
                texts.insert(normalize_option_text(candidate.display_text()));
            }
            chosen.push(Rc::clone(candidate));
            on_accept(candidate);
        }
        if chosen.len() >= desired {
            break;
        }
        log::debug!(
            "Only {} of {desired} options for {} after {pass:?} pass",
            chosen.len(),
            target.id
        );
    }

    chosen
}

fn acceptable(
    candidate: &Word,
    chosen: &[Rc<Word>],
    texts: &HashSet<String>,
    text_mode: bool,
    pass: Pass,
) -> bool {
    if chosen.iter().any(|c| c.id == candidate.id) {
        return false;
    }
    if pass == Pass::Fallback {
        return true;
    }
    if chosen.iter().any(|c| c.is_similar_to(candidate)) {
        return false;
    }
    if text_mode && texts.contains(&normalize_option_text(candidate.display_text())) {
        return false;
    }
    if pass == Pass::Strict && chosen.iter().any(|c| conflicts(c, candidate)) {
        return false;
    }
    true
}

/// Two words can't share a card set when either blocks the other or they
/// show the same picture.
pub fn conflicts(a: &Word, b: &Word) -> bool {
    if a.blocks(b) {
        return true;
    }
    match (
        a.image.as_deref().and_then(image_identity),
        b.image.as_deref().and_then(image_identity),
    ) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn word(id: u64, title: &str) -> Rc<Word> {
        Rc::new(Word {
            id,
            title: title.into(),
            image: Some(format!("https://example.org/img/{id}.jpg")),
            ..Default::default()
        })
    }

    fn build(request: &OptionRequest<'_>, seed: u64) -> Vec<Rc<Word>> {
        let mut rng = StdRng::seed_from_u64(seed);
        build_options(request, &mut rng, &UnboundedLayout, &mut |_| {})
    }

    fn ids(words: &[Rc<Word>]) -> Vec<u64> {
        words.iter().map(|w| w.id).collect()
    }

    #[test]
    fn test_three_animals_all_appear_once() {
        let pool = vec![word(1, "Cat"), word(2, "Dog"), word(3, "Bird")];
        for (seed, target) in pool.iter().enumerate() {
            let request = OptionRequest {
                target,
                desired: 3,
                primary: &pool,
                supplemental: &[],
                text_mode: false,
                min_options: 2,
                max_options: 9,
            };
            let chosen = build(&request, seed as u64);
            assert_eq!(chosen.len(), 3);
            assert_eq!(chosen[0].id, target.id);
            let mut sorted = ids(&chosen);
            sorted.sort();
            assert_eq!(sorted, vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_count_never_exceeds_pool() {
        let pool = vec![word(1, "Cat"), word(2, "Dog"), word(3, "Bird")];
        let request = OptionRequest {
            target: &pool[0],
            desired: 9,
            primary: &pool,
            supplemental: &[],
            text_mode: false,
            min_options: 2,
            max_options: 9,
        };
        assert_eq!(build(&request, 1).len(), 3);
    }

    #[test]
    fn test_similar_words_are_kept_apart() {
        let target = Rc::new(Word {
            id: 1,
            title: "ship".into(),
            similar_word_id: Some(2),
            ..Default::default()
        });
        let pool = vec![target.clone(), word(2, "sheep"), word(3, "shop")];
        let request = OptionRequest {
            target: &target,
            desired: 2,
            primary: &pool,
            supplemental: &[],
            text_mode: false,
            min_options: 2,
            max_options: 9,
        };
        for seed in 0..10 {
            assert_eq!(ids(&build(&request, seed)), vec![1, 3]);
        }
    }

    #[test]
    fn test_text_mode_rejects_same_reading() {
        let pool = vec![word(1, "Irmak"), word(2, "ırmak"), word(3, "Göl")];
        let request = OptionRequest {
            target: &pool[0],
            desired: 2,
            primary: &pool,
            supplemental: &[],
            text_mode: true,
            min_options: 2,
            max_options: 9,
        };
        for seed in 0..10 {
            assert_eq!(ids(&build(&request, seed)), vec![1, 3]);
        }
    }

    #[test]
    fn test_conflicting_words_wait_for_relaxed_pass() {
        let target = Rc::new(Word {
            id: 1,
            title: "cat".into(),
            option_blocked_ids: vec![2],
            ..Default::default()
        });
        let same_picture = Rc::new(Word {
            id: 3,
            title: "kitten".into(),
            image: Some("https://example.org/p?lltools-img=40".into()),
            ..Default::default()
        });
        let target_with_picture = Rc::new(Word {
            image: Some("https://example.org/q?attachment_id=40#zoom".into()),
            ..(*target).clone()
        });
        let pool = vec![target_with_picture.clone(), word(2, "dog"), same_picture];
        let elsewhere = vec![word(10, "table")];
        let request = OptionRequest {
            target: &target_with_picture,
            desired: 2,
            primary: &pool,
            supplemental: &elsewhere,
            text_mode: false,
            min_options: 2,
            max_options: 9,
        };
        for seed in 0..10 {
            let chosen = build(&request, seed);
            assert_eq!(chosen.len(), 2);
            assert_eq!(chosen[0].id, 1);
            assert!([2, 3].contains(&chosen[1].id));
        }
    }

    #[test]
    fn test_fallback_guarantees_minimum() {
        let pool = vec![word(1, "same"), word(2, "Same")];
        let request = OptionRequest {
            target: &pool[0],
            desired: 2,
            primary: &pool,
            supplemental: &[],
            text_mode: true,
            min_options: 2,
            max_options: 9,
        };
        assert_eq!(ids(&build(&request, 0)), vec![1, 2]);
    }

    #[test]
    fn test_layout_stops_after_minimum() {
        let pool: Vec<_> = (1..=9).map(|id| word(id, &format!("w{id}"))).collect();
        let request = OptionRequest {
            target: &pool[0],
            desired: 9,
            primary: &pool,
            supplemental: &[],
            text_mode: false,
            min_options: 2,
            max_options: 9,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let mut accepted = Vec::new();
        let chosen = build_options(&request, &mut rng, &FixedLayout(4), &mut |w| {
            accepted.push(w.id)
        });
        assert_eq!(chosen.len(), 4);
        assert_eq!(accepted.len(), 3);

        let chosen = build_options(&request, &mut rng, &FixedLayout(0), &mut |_| {});
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_option_groups_are_front_loaded() {
        let mut target = (*word(1, "red")).clone();
        target.option_groups = vec!["colours".into()];
        let target = Rc::new(target);
        let mut blue = (*word(2, "blue")).clone();
        blue.option_groups = vec!["colours".into()];
        let mut pool = vec![target.clone(), Rc::new(blue)];
        pool.extend((3..=9).map(|id| word(id, &format!("thing{id}"))));
        let request = OptionRequest {
            target: &target,
            desired: 2,
            primary: &pool,
            supplemental: &[],
            text_mode: false,
            min_options: 2,
            max_options: 9,
        };
        for seed in 0..10 {
            assert_eq!(ids(&build(&request, seed)), vec![1, 2]);
        }
    }
}
