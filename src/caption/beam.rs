//! Beam search over an autoregressive token scorer.

use anyhow::{anyhow, Result};
use std::cmp::Ordering;

/// Produces next-token logits for a token prefix.
pub trait TokenScorer {
    /// Unnormalized scores over the whole vocabulary for the token following
    /// `prefix`. The prefix always starts with the BOS token.
    fn next_logits(&mut self, prefix: &[i64]) -> Result<Vec<f32>>;
}

/// Generation limits.
#[derive(Clone, Copy, Debug)]
pub struct BeamConfig {
    /// Upper bound on sequence length, BOS included.
    pub max_length: usize,
    pub num_beams: usize,
    pub bos_token_id: i64,
    pub eos_token_id: i64,
    /// Exponent applied to the length when ranking finished hypotheses.
    pub length_penalty: f32,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            max_length: 30,
            num_beams: 5,
            bos_token_id: 30522,
            eos_token_id: 102,
            length_penalty: 1.0,
        }
    }
}

#[derive(Clone, Debug)]
struct Hypothesis {
    tokens: Vec<i64>,
    log_prob: f32,
}

impl Hypothesis {
    fn normalized(&self, length_penalty: f32) -> f32 {
        self.log_prob / (self.tokens.len() as f32).powf(length_penalty)
    }
}

/// Run beam search and return the best sequence, BOS and EOS excluded.
pub fn beam_search<S: TokenScorer + ?Sized>(scorer: &mut S, config: &BeamConfig) -> Result<Vec<i64>> {
    if config.num_beams == 0 {
        return Err(anyhow!("num_beams must be at least 1"));
    }
    if config.max_length < 2 {
        return Err(anyhow!("max_length must leave room for at least one token"));
    }

    let mut beams = vec![Hypothesis {
        tokens: vec![config.bos_token_id],
        log_prob: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    while !beams.is_empty() && finished.len() < config.num_beams {
        let mut candidates: Vec<Hypothesis> = Vec::with_capacity(beams.len() * config.num_beams);
        for beam in &beams {
            let logits = scorer.next_logits(&beam.tokens)?;
            if logits.is_empty() {
                return Err(anyhow!("scorer returned empty logits"));
            }
            let log_probs = log_softmax(&logits);
            for (token, lp) in top_k(&log_probs, config.num_beams) {
                let mut tokens = beam.tokens.clone();
                tokens.push(token as i64);
                candidates.push(Hypothesis {
                    tokens,
                    log_prob: beam.log_prob + lp,
                });
            }
        }
        candidates.sort_by(|a, b| b.log_prob.partial_cmp(&a.log_prob).unwrap_or(Ordering::Equal));

        // Finished hypotheses use up one of the step's `num_beams` places.
        beams.clear();
        for candidate in candidates.into_iter().take(config.num_beams) {
            let ended = candidate.tokens.last() == Some(&config.eos_token_id);
            if ended || candidate.tokens.len() >= config.max_length {
                finished.push(candidate);
            } else {
                beams.push(candidate);
            }
        }
    }
    finished.extend(beams);

    let best = finished
        .into_iter()
        .max_by(|a, b| {
            a.normalized(config.length_penalty)
                .partial_cmp(&b.normalized(config.length_penalty))
                .unwrap_or(Ordering::Equal)
        })
        .ok_or_else(|| anyhow!("beam search produced no hypotheses"))?;

    Ok(best
        .tokens
        .into_iter()
        .skip(1)
        .filter(|&t| t != config.eos_token_id)
        .collect())
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let sum: f32 = logits.iter().map(|&v| (v - max).exp()).sum();
    let log_sum = sum.ln() + max;
    logits.iter().map(|&v| v - log_sum).collect()
}

fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.truncate(k);
    indexed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const BOS: i64 = 0;
    const EOS: i64 = 1;

    /// Scorer driven by a table of prefix -> preferred next tokens.
    struct TableScorer {
        vocab: usize,
        table: HashMap<Vec<i64>, Vec<(i64, f32)>>,
        calls: usize,
    }

    impl TokenScorer for TableScorer {
        fn next_logits(&mut self, prefix: &[i64]) -> Result<Vec<f32>> {
            self.calls += 1;
            let mut logits = vec![-10.0; self.vocab];
            match self.table.get(prefix) {
                Some(entries) => {
                    for &(token, score) in entries {
                        logits[token as usize] = score;
                    }
                }
                None => logits[EOS as usize] = 10.0,
            }
            Ok(logits)
        }
    }

    fn config(num_beams: usize, max_length: usize) -> BeamConfig {
        BeamConfig {
            max_length,
            num_beams,
            bos_token_id: BOS,
            eos_token_id: EOS,
            length_penalty: 1.0,
        }
    }

    #[test]
    fn greedy_path_is_followed() -> Result<()> {
        let mut table = HashMap::new();
        table.insert(vec![BOS], vec![(2, 5.0)]);
        table.insert(vec![BOS, 2], vec![(3, 5.0)]);
        let mut scorer = TableScorer {
            vocab: 6,
            table,
            calls: 0,
        };

        let tokens = beam_search(&mut scorer, &config(1, 10))?;
        assert_eq!(tokens, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn beam_recovers_sequence_greedy_would_miss() -> Result<()> {
        // Token 2 looks best first, but every continuation after it is poor;
        // token 3 leads to a confident finish.
        let mut table = HashMap::new();
        table.insert(vec![BOS], vec![(2, 2.0), (3, 1.8)]);
        table.insert(vec![BOS, 2], vec![(4, 0.0), (5, 0.0), (EOS, 0.0)]);
        table.insert(vec![BOS, 3], vec![(EOS, 9.0)]);

        let mut greedy = TableScorer {
            vocab: 6,
            table: table.clone(),
            calls: 0,
        };
        let greedy_tokens = beam_search(&mut greedy, &config(1, 3))?;
        assert_eq!(greedy_tokens.first(), Some(&2));

        let mut beam = TableScorer {
            vocab: 6,
            table,
            calls: 0,
        };
        let beam_tokens = beam_search(&mut beam, &config(3, 3))?;
        assert_eq!(beam_tokens, vec![3]);
        Ok(())
    }

    #[test]
    fn output_length_is_bounded() -> Result<()> {
        // Scorer never prefers EOS.
        struct Babbler;
        impl TokenScorer for Babbler {
            fn next_logits(&mut self, _prefix: &[i64]) -> Result<Vec<f32>> {
                Ok(vec![-5.0, -5.0, 3.0, 2.0])
            }
        }

        let tokens = beam_search(&mut Babbler, &config(2, 6))?;
        assert!(tokens.len() <= 5);
        assert!(!tokens.is_empty());
        Ok(())
    }

    #[test]
    fn rejects_zero_beams() {
        let mut scorer = TableScorer {
            vocab: 4,
            table: HashMap::new(),
            calls: 0,
        };
        assert!(beam_search(&mut scorer, &config(0, 10)).is_err());
        assert_eq!(scorer.calls, 0);
    }

    #[test]
    fn log_softmax_normalizes() {
        let lp = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = lp.iter().map(|v| v.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }
}
