//   Licensed under the Apache License, Version 2.0 (the "License");
//   you may not use this file except in compliance with the License.
//   You may obtain a copy of the License at
//
//       http://www.apache.org/licenses/LICENSE-2.0
//
//   Unless required by applicable law or agreed to in writing, software
//   distributed under the License is distributed on an "AS IS" BASIS,
//   WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//   See the License for the specific language governing permissions and
//   limitations under the License.
#![warn(missing_docs)]

//! sumtrees draws posterior samples from Bayesian Additive Regression
//! Trees (BART) models over tabular data. The outcome is modeled as a sum
//! of many small trees, each regularized by a depth prior so that no
//! single tree can explain the data on its own. Two samplers are
//! provided: the classic Metropolis-Hastings grow/prune update over a
//! persistent ensemble, and the XBART-style stochastic grow-from-root
//! update that rebuilds each tree every sweep from feature-presorted
//! partitions.

pub mod cutpoint;
pub mod data;
pub mod error;
pub mod gfr;
pub mod leaf;
pub mod math;
pub mod mcmc;
pub mod partition;
pub mod presort;
pub mod priors;
pub mod run;
pub mod settings;
pub mod split;
pub mod suffstat;
pub mod tree;

pub use data::{Dataset, FeatureType};
pub use error::{Error, Result};
pub use run::{BartRunner, ModelDraw};
pub use settings::{LeafModelKind, Method, Settings};
